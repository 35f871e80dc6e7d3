// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Passgate entitlement engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Limits;

/// Plan identifier of the anonymous tier.
pub const FREE_PLAN: &str = "free";

/// Plan identifier minted by the standard checkout.
pub const PASS_PLAN: &str = "pass";

/// A grouping key selecting which threshold set applies.
///
/// Keys are trimmed and lower-cased so `"PDF "` and `"pdf"` hit the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ToolCategory(String);

impl ToolCategory {
    pub const PDF: &'static str = "pdf";
    pub const IMAGE: &'static str = "image";
    pub const WEB_TOOLS: &'static str = "web-tools";

    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for a missing category (empty key).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ToolCategory {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ToolCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ToolCategory> for String {
    fn from(value: ToolCategory) -> Self {
        value.0
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The plan a caller is evaluated under.
///
/// Serialized as the bare plan string (`"free"`, `"pass"`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserPlan {
    /// Anonymous caller, or a caller whose pass is absent, expired or malformed.
    #[default]
    Free,
    /// Holder of an active Processing Pass for the named plan.
    Elevated(String),
}

impl UserPlan {
    /// Parse a plan identifier. Blank strings and `"free"` map to [`UserPlan::Free`].
    pub fn from_id(id: &str) -> Self {
        let id = id.trim();
        if id.is_empty() || id.eq_ignore_ascii_case(FREE_PLAN) {
            Self::Free
        } else {
            Self::Elevated(id.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Free => FREE_PLAN,
            Self::Elevated(id) => id,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Elevated(_))
    }
}

impl From<String> for UserPlan {
    fn from(value: String) -> Self {
        Self::from_id(&value)
    }
}

impl From<UserPlan> for String {
    fn from(value: UserPlan) -> Self {
        match value {
            UserPlan::Free => FREE_PLAN.to_owned(),
            UserPlan::Elevated(id) => id,
        }
    }
}

impl std::fmt::Display for UserPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-boxed entitlement purchased at checkout.
///
/// Persisted client-side as a flat JSON object. Unknown fields are ignored so
/// newer issuers can add fields (the `signature` of a signed pass, for one)
/// without breaking older readers. A payload missing `expiresAt` or `plan`
/// fails to deserialize and is therefore never treated as a valid pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingPass {
    pub session_id: String,
    #[serde(
        default,
        with = "flexible_timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(with = "flexible_timestamp")]
    pub expires_at: DateTime<Utc>,
    pub plan: String,
}

impl ProcessingPass {
    /// A pass is active strictly before its expiry instant.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// The plan this pass grants, ignoring expiry.
    pub fn granted_plan(&self) -> UserPlan {
        UserPlan::from_id(&self.plan)
    }
}

/// A caller's session snapshot as read from client storage.
///
/// Deserialization never fails on a corrupt `processingPass`: the pass is
/// simply dropped, which degrades the caller to the free tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_pass: Option<ProcessingPass>,
}

impl Session {
    /// An anonymous session with no pass.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_pass(pass: ProcessingPass) -> Self {
        Self {
            processing_pass: Some(pass),
        }
    }

    /// Build a session from an arbitrary JSON value.
    ///
    /// Anything other than an object whose `processingPass` field is a
    /// well-formed pass yields an anonymous session.
    pub fn from_value(value: serde_json::Value) -> Self {
        let processing_pass = match value {
            serde_json::Value::Object(mut map) => map
                .remove("processingPass")
                .and_then(|raw| serde_json::from_value::<ProcessingPass>(raw).ok()),
            _ => None,
        };
        Self { processing_pass }
    }

    /// Parse raw stored text. Unparseable text yields an anonymous session.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(Self::from_value)
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

/// A processing pass together with the issuer's HMAC signature.
///
/// Serialized flat: the pass fields plus a hex `signature` field, so the
/// client-side evaluator can read it as a plain [`ProcessingPass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPass {
    #[serde(flatten)]
    pub pass: ProcessingPass,
    pub signature: String,
}

/// Largest file count a request can carry after normalisation.
pub const MAX_FILE_COUNT: u32 = u32::MAX;

/// Normalise a raw (possibly negative, fractional or NaN) byte total.
///
/// NaN and non-positive values clamp to 0, fractions round up and anything
/// beyond `u64::MAX` (including +inf) saturates so the size check blocks.
pub fn clamp_size(raw: f64) -> u64 {
    if raw.is_nan() || raw <= 0.0 {
        0
    } else if raw >= u64::MAX as f64 {
        u64::MAX
    } else {
        raw.ceil() as u64
    }
}

/// Normalise a raw file count. NaN and values below one clamp to 1.
pub fn clamp_count(raw: f64) -> u32 {
    if raw.is_nan() || raw < 1.0 {
        1
    } else if raw >= MAX_FILE_COUNT as f64 {
        MAX_FILE_COUNT
    } else {
        raw.ceil() as u32
    }
}

/// A single operation's resource footprint, built per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRequest {
    pub tool_category: ToolCategory,
    pub total_size_bytes: u64,
    pub file_count: u32,
    pub user_plan: UserPlan,
}

impl UsageRequest {
    /// Build a request. A zero file count is floored to one.
    pub fn new(
        tool_category: impl Into<ToolCategory>,
        total_size_bytes: u64,
        file_count: u32,
        user_plan: UserPlan,
    ) -> Self {
        Self {
            tool_category: tool_category.into(),
            total_size_bytes,
            file_count: file_count.max(1),
            user_plan,
        }
    }

    /// Build a request from untrusted floating-point inputs (e.g. a browser
    /// payload), applying [`clamp_size`] and [`clamp_count`].
    pub fn from_raw(
        tool_category: impl Into<ToolCategory>,
        total_size_bytes: f64,
        file_count: f64,
        user_plan: UserPlan,
    ) -> Self {
        Self::new(
            tool_category,
            clamp_size(total_size_bytes),
            clamp_count(file_count),
            user_plan,
        )
    }
}

/// Why an operation was blocked. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentReason {
    /// The batch's total size exceeds the size threshold.
    FileSize,
    /// The batch holds more files than the batch threshold.
    Batch,
    /// Within every threshold.
    None,
}

impl PaymentReason {
    pub fn requires_payment(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileSize => "file_size",
            Self::Batch => "batch",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for PaymentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The evaluator's verdict, echoing inputs and the thresholds applied.
///
/// `requires_payment` is always derived from `reason`, so the two can never
/// disagree. Deserialization rejects payloads where they do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RequirementWire")]
pub struct PaymentRequirement {
    requires_payment: bool,
    reason: PaymentReason,
    tool_category: ToolCategory,
    /// Set when the category was unknown and the fallback thresholds applied.
    fallback_category: bool,
    user_plan: UserPlan,
    file_size: u64,
    file_count: u32,
    max_file_size: u64,
    max_file_count: u32,
}

impl PaymentRequirement {
    /// Record a verdict for `request` under the applied `limits`.
    pub fn new(
        reason: PaymentReason,
        request: &UsageRequest,
        limits: Limits,
        fallback_category: bool,
    ) -> Self {
        Self {
            requires_payment: reason.requires_payment(),
            reason,
            tool_category: request.tool_category.clone(),
            fallback_category,
            user_plan: request.user_plan.clone(),
            file_size: request.total_size_bytes,
            file_count: request.file_count,
            max_file_size: limits.max_size_bytes,
            max_file_count: limits.max_file_count,
        }
    }

    pub fn requires_payment(&self) -> bool {
        self.requires_payment
    }

    pub fn reason(&self) -> PaymentReason {
        self.reason
    }

    pub fn tool_category(&self) -> &ToolCategory {
        &self.tool_category
    }

    pub fn used_fallback_category(&self) -> bool {
        self.fallback_category
    }

    pub fn user_plan(&self) -> &UserPlan {
        &self.user_plan
    }

    /// Total bytes of the evaluated batch.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn max_file_count(&self) -> u32 {
        self.max_file_count
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_size_bytes: self.max_file_size,
            max_file_count: self.max_file_count,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequirementWire {
    requires_payment: bool,
    reason: PaymentReason,
    tool_category: ToolCategory,
    #[serde(default)]
    fallback_category: bool,
    user_plan: UserPlan,
    file_size: u64,
    file_count: u32,
    max_file_size: u64,
    max_file_count: u32,
}

impl TryFrom<RequirementWire> for PaymentRequirement {
    type Error = String;

    fn try_from(wire: RequirementWire) -> std::result::Result<Self, Self::Error> {
        if wire.requires_payment != wire.reason.requires_payment() {
            return Err(format!(
                "requiresPayment={} contradicts reason={}",
                wire.requires_payment, wire.reason
            ));
        }
        Ok(Self {
            requires_payment: wire.requires_payment,
            reason: wire.reason,
            tool_category: wire.tool_category,
            fallback_category: wire.fallback_category,
            user_plan: wire.user_plan,
            file_size: wire.file_size,
            file_count: wire.file_count,
            max_file_size: wire.max_file_size,
            max_file_count: wire.max_file_count,
        })
    }
}

/// Where in the request lifecycle an evaluation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    /// Client-side, when the user selects files.
    Selection,
    /// Client-side, immediately before the conversion request is sent.
    Dispatch,
    /// Server-side re-validation in front of the conversion backend.
    Server,
}

impl EvaluationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selection => "selection",
            Self::Dispatch => "dispatch",
            Self::Server => "server",
        }
    }
}

/// Timestamps that accept either RFC 3339 text or epoch milliseconds.
///
/// Browsers persist `Date.now() + duration` as a bare number, the issuer
/// writes RFC 3339. Both decode to the same instant; output is always text.
pub mod flexible_timestamp {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        FractionalMillis(f64),
        Text(String),
    }

    impl RawTimestamp {
        fn into_datetime(self) -> Result<DateTime<Utc>, String> {
            match self {
                Self::Millis(ms) => Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| format!("timestamp out of range: {ms}")),
                Self::FractionalMillis(ms) if ms.is_finite() => Utc
                    .timestamp_millis_opt(ms.floor() as i64)
                    .single()
                    .ok_or_else(|| format!("timestamp out of range: {ms}")),
                Self::FractionalMillis(ms) => Err(format!("non-finite timestamp: {ms}")),
                Self::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| format!("invalid timestamp {text:?}: {e}")),
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        RawTimestamp::deserialize(deserializer)?
            .into_datetime()
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::RawTimestamp;
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<RawTimestamp>::deserialize(deserializer)?
                .map(RawTimestamp::into_datetime)
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}
