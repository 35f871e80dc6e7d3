// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payment requirement evaluation.
//
// Checks run in a fixed order and stop at the first violation:
//
//   1. total size  > max size   -> file_size
//   2. file count  > max files  -> batch
//   3. otherwise                -> none
//
// Pages word their prompts from the reason code, so the order is part of
// the contract shared with the server-side re-check.

use passgate_core::config::{Limits, PricingConfig};
use passgate_core::types::{PaymentReason, PaymentRequirement, ToolCategory, UsageRequest, UserPlan};
use tracing::{debug, warn};

/// First violated threshold for a batch, if any.
pub fn decide(limits: Limits, total_size_bytes: u64, file_count: u32) -> PaymentReason {
    if total_size_bytes > limits.max_size_bytes {
        PaymentReason::FileSize
    } else if file_count > limits.max_file_count {
        PaymentReason::Batch
    } else {
        PaymentReason::None
    }
}

/// Evaluate `request` against `pricing`.
///
/// Deterministic: identical inputs always produce identical requirements.
pub fn check_payment_requirement(
    pricing: &PricingConfig,
    request: &UsageRequest,
) -> PaymentRequirement {
    let resolved = pricing.resolve(&request.tool_category, &request.user_plan);
    if resolved.fallback {
        warn!(
            category = %request.tool_category,
            "no pricing row for tool category, applying fallback limits"
        );
    }

    let reason = decide(
        resolved.limits,
        request.total_size_bytes,
        request.file_count,
    );

    debug!(
        category = %request.tool_category,
        plan = %request.user_plan,
        size = request.total_size_bytes,
        files = request.file_count,
        max_size = resolved.limits.max_size_bytes,
        max_files = resolved.limits.max_file_count,
        %reason,
        "payment requirement evaluated"
    );

    PaymentRequirement::new(reason, request, resolved.limits, resolved.fallback)
}

/// The entitlement evaluator, bound to one pricing table.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    pricing: PricingConfig,
}

impl Evaluator {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn evaluate(&self, request: &UsageRequest) -> PaymentRequirement {
        check_payment_requirement(&self.pricing, request)
    }

    /// Evaluate a batch of `file_count` files totalling `total_size_bytes`
    /// for a tool in `tool_category`.
    pub fn check_payment_requirement(
        &self,
        tool_category: &str,
        total_size_bytes: u64,
        file_count: u32,
        user_plan: &UserPlan,
    ) -> PaymentRequirement {
        let request = UsageRequest::new(
            tool_category,
            total_size_bytes,
            file_count,
            user_plan.clone(),
        );
        self.evaluate(&request)
    }

    /// Older pages only pass size and count. They are evaluated against the
    /// fallback limits, the same as any other unknown category.
    pub fn check_uncategorized(
        &self,
        total_size_bytes: u64,
        file_count: u32,
        user_plan: &UserPlan,
    ) -> PaymentRequirement {
        let request = UsageRequest::new(
            ToolCategory::new(""),
            total_size_bytes,
            file_count,
            user_plan.clone(),
        );
        self.evaluate(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_core::types::PASS_PLAN;

    const MIB: u64 = 1024 * 1024;

    fn pass() -> UserPlan {
        UserPlan::Elevated(PASS_PLAN.into())
    }

    #[test]
    fn small_pdf_is_free() {
        let req = Evaluator::default().check_payment_requirement("pdf", 5 * MIB, 1, &UserPlan::Free);
        assert!(!req.requires_payment());
        assert_eq!(req.reason(), PaymentReason::None);
        assert_eq!(req.file_size(), 5 * MIB);
        assert_eq!(req.max_file_size(), 100 * MIB);
    }

    #[test]
    fn large_pdf_needs_payment_for_size() {
        let req =
            Evaluator::default().check_payment_requirement("pdf", 150 * MIB, 1, &UserPlan::Free);
        assert!(req.requires_payment());
        assert_eq!(req.reason(), PaymentReason::FileSize);
    }

    #[test]
    fn fourth_file_needs_payment_for_batch() {
        let req = Evaluator::default().check_payment_requirement("pdf", 1024, 4, &UserPlan::Free);
        assert!(req.requires_payment());
        assert_eq!(req.reason(), PaymentReason::Batch);
        assert_eq!(req.max_file_count(), 3);
    }

    #[test]
    fn pass_lifts_batch_limit() {
        let req = Evaluator::default().check_payment_requirement("pdf", 1024, 4, &pass());
        assert!(!req.requires_payment());
        assert_eq!(req.max_file_count(), 20);
    }

    #[test]
    fn pass_still_has_upper_bound() {
        let evaluator = Evaluator::default();
        let size = evaluator.check_payment_requirement("pdf", 201 * MIB, 1, &pass());
        assert_eq!(size.reason(), PaymentReason::FileSize);
        let batch = evaluator.check_payment_requirement("pdf", 1024, 21, &pass());
        assert_eq!(batch.reason(), PaymentReason::Batch);
    }

    #[test]
    fn size_wins_over_batch() {
        let req =
            Evaluator::default().check_payment_requirement("pdf", 500 * MIB, 50, &UserPlan::Free);
        assert_eq!(req.reason(), PaymentReason::FileSize);
    }

    #[test]
    fn limits_are_inclusive() {
        let evaluator = Evaluator::default();
        let req = evaluator.check_payment_requirement("pdf", 100 * MIB, 3, &UserPlan::Free);
        assert_eq!(req.reason(), PaymentReason::None);
        let req = evaluator.check_payment_requirement("pdf", 100 * MIB + 1, 3, &UserPlan::Free);
        assert_eq!(req.reason(), PaymentReason::FileSize);
    }

    #[test]
    fn unknown_category_is_flagged_and_conservative() {
        let req = Evaluator::default().check_payment_requirement("video", 1024, 2, &UserPlan::Free);
        assert!(req.used_fallback_category());
        assert_eq!(req.max_file_size(), PricingConfig::FALLBACK_FREE.max_size_bytes);
        assert_eq!(req.reason(), PaymentReason::Batch);
    }

    #[test]
    fn uncategorized_entry_point_uses_fallback() {
        let evaluator = Evaluator::default();
        let legacy = evaluator.check_uncategorized(20 * MIB, 1, &UserPlan::Free);
        assert!(legacy.used_fallback_category());
        assert_eq!(legacy.reason(), PaymentReason::FileSize);

        let with_pass = evaluator.check_uncategorized(20 * MIB, 1, &pass());
        assert_eq!(with_pass.reason(), PaymentReason::None);
    }

    #[test]
    fn raw_inputs_are_clamped_before_comparison() {
        let evaluator = Evaluator::default();
        let request = UsageRequest::from_raw("pdf", f64::NAN, -4.0, UserPlan::Free);
        let req = evaluator.evaluate(&request);
        assert_eq!(req.file_size(), 0);
        assert_eq!(req.file_count(), 1);
        assert_eq!(req.reason(), PaymentReason::None);

        let huge = UsageRequest::from_raw("pdf", f64::INFINITY, 1.0, pass());
        assert_eq!(evaluator.evaluate(&huge).reason(), PaymentReason::FileSize);
    }

    #[test]
    fn custom_table_is_honoured() {
        let json = r#"{
            "categories": {
                "pdf": {
                    "free": { "max_size_bytes": 10, "max_file_count": 1 },
                    "plans": { "pro": { "max_size_bytes": 1000, "max_file_count": 5 } }
                }
            },
            "fallback": { "free": { "max_size_bytes": 1, "max_file_count": 1 } }
        }"#;
        let evaluator = Evaluator::new(PricingConfig::from_json(json).unwrap());
        let free = evaluator.check_payment_requirement("pdf", 11, 1, &UserPlan::Free);
        assert_eq!(free.reason(), PaymentReason::FileSize);
        let pro = evaluator.check_payment_requirement("pdf", 11, 5, &UserPlan::Elevated("pro".into()));
        assert_eq!(pro.reason(), PaymentReason::None);
    }
}
