// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pricing tables and application configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PassgateError, Result};
use crate::types::{PASS_PLAN, ToolCategory, UserPlan};

const MIB: u64 = 1024 * 1024;

/// Upper bounds for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Largest total batch size, in bytes, that passes the size check.
    pub max_size_bytes: u64,
    /// Largest number of files/URLs that passes the batch check.
    pub max_file_count: u32,
}

impl Limits {
    pub const fn new(max_size_bytes: u64, max_file_count: u32) -> Self {
        Self {
            max_size_bytes,
            max_file_count,
        }
    }

    /// Component-wise maximum with `floor`.
    pub fn at_least(self, floor: Limits) -> Limits {
        Limits {
            max_size_bytes: self.max_size_bytes.max(floor.max_size_bytes),
            max_file_count: self.max_file_count.max(floor.max_file_count),
        }
    }

    /// True when neither bound is looser than `other`'s.
    pub fn is_within(self, other: Limits) -> bool {
        self.max_size_bytes <= other.max_size_bytes && self.max_file_count <= other.max_file_count
    }
}

/// Free-tier limits plus elevated limits per plan for one tool category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimits {
    pub free: Limits,
    #[serde(default)]
    pub plans: BTreeMap<String, Limits>,
}

impl CategoryLimits {
    /// Limits with a single elevated `pass` tier.
    pub fn with_pass(free: Limits, pass: Limits) -> Self {
        Self {
            free,
            plans: BTreeMap::from([(PASS_PLAN.to_owned(), pass)]),
        }
    }

    /// Limits applying to `plan`.
    ///
    /// Elevated plans are never stricter than the free tier, even when the
    /// table says otherwise, and a plan with no row gets the free limits.
    pub fn for_plan(&self, plan: &UserPlan) -> Limits {
        match plan {
            UserPlan::Free => self.free,
            UserPlan::Elevated(id) => self
                .plans
                .get(id)
                .map(|limits| limits.at_least(self.free))
                .unwrap_or(self.free),
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        check_nonzero(label, "free", self.free)?;
        for (plan, limits) in &self.plans {
            check_nonzero(label, plan, *limits)?;
            if !self.free.is_within(*limits) {
                return Err(PassgateError::InvalidPricing(format!(
                    "{label}: plan {plan:?} is stricter than the free tier"
                )));
            }
        }
        Ok(())
    }
}

fn check_nonzero(label: &str, plan: &str, limits: Limits) -> Result<()> {
    if limits.max_size_bytes == 0 || limits.max_file_count == 0 {
        return Err(PassgateError::InvalidPricing(format!(
            "{label}: plan {plan:?} has a zero limit"
        )));
    }
    Ok(())
}

/// Limits resolved for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub limits: Limits,
    /// The category had no row and the fallback set was used.
    pub fallback: bool,
}

/// Threshold table keyed by tool category and plan tier.
///
/// Passed to the evaluator explicitly so any table can be tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub categories: BTreeMap<String, CategoryLimits>,
    /// Conservative set applied to unknown or missing categories.
    pub fallback: CategoryLimits,
}

impl PricingConfig {
    /// Free limits of the fallback category: 10 MiB, single file.
    pub const FALLBACK_FREE: Limits = Limits::new(10 * MIB, 1);
    /// `pass` limits of the fallback category: 100 MiB, 10 files.
    pub const FALLBACK_PASS: Limits = Limits::new(100 * MIB, 10);

    /// Resolve the limits for a category and plan.
    pub fn resolve(&self, category: &ToolCategory, plan: &UserPlan) -> ResolvedLimits {
        match self.categories.get(category.as_str()) {
            Some(row) => ResolvedLimits {
                limits: row.for_plan(plan),
                fallback: false,
            },
            None => ResolvedLimits {
                limits: self.fallback.for_plan(plan),
                fallback: true,
            },
        }
    }

    /// Reject tables with zero limits or elevated plans stricter than free.
    pub fn validate(&self) -> Result<()> {
        for (key, row) in &self.categories {
            if ToolCategory::new(key).as_str() != key {
                return Err(PassgateError::InvalidPricing(format!(
                    "category key {key:?} must be lower-case and trimmed"
                )));
            }
            row.validate(key)?;
        }
        self.fallback.validate("fallback")
    }

    /// Read a table from a JSON file, normalising keys and validating it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(data)?;
        config.categories = std::mem::take(&mut config.categories)
            .into_iter()
            .map(|(key, row)| (ToolCategory::new(&key).into(), row))
            .collect();
        config.validate()?;
        Ok(config)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        let pdf = CategoryLimits::with_pass(Limits::new(100 * MIB, 3), Limits::new(200 * MIB, 20));
        let image = CategoryLimits::with_pass(Limits::new(50 * MIB, 3), Limits::new(200 * MIB, 20));
        let web = CategoryLimits::with_pass(Limits::new(10 * MIB, 3), Limits::new(50 * MIB, 20));
        Self {
            categories: BTreeMap::from([
                (ToolCategory::PDF.to_owned(), pdf),
                (ToolCategory::IMAGE.to_owned(), image),
                (ToolCategory::WEB_TOOLS.to_owned(), web),
            ]),
            fallback: CategoryLimits::with_pass(Self::FALLBACK_FREE, Self::FALLBACK_PASS),
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the gate server binds to.
    pub bind_address: String,
    /// Port for the gate server (0 picks an ephemeral port).
    pub server_port: u16,
    /// How long a freshly issued pass stays valid.
    pub pass_duration_hours: u32,
    /// Record every server-side evaluation in the decision log.
    pub audit_enabled: bool,
    pub pricing: PricingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pass_duration_hours == 0 {
            return Err(PassgateError::Config(
                "pass_duration_hours must be at least 1".into(),
            ));
        }
        self.pricing.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            server_port: 8402,
            pass_duration_hours: 24,
            audit_enabled: true,
            pricing: PricingConfig::default(),
        }
    }
}
