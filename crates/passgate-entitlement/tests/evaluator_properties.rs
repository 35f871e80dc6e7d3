// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Property tests for the entitlement evaluator.

use chrono::{Duration, TimeZone, Utc};
use passgate_core::config::PricingConfig;
use passgate_core::types::{
    PASS_PLAN, PaymentReason, ProcessingPass, Session, ToolCategory, UsageRequest, UserPlan,
};
use passgate_entitlement::{Evaluator, get_user_plan};
use proptest::prelude::*;

const MIB: u64 = 1024 * 1024;

fn category() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(ToolCategory::PDF.to_owned()),
        Just(ToolCategory::IMAGE.to_owned()),
        Just(ToolCategory::WEB_TOOLS.to_owned()),
        "[a-z]{1,12}",
        Just(String::new()),
    ]
}

fn plan() -> impl Strategy<Value = UserPlan> {
    prop_oneof![
        Just(UserPlan::Free),
        Just(UserPlan::Elevated(PASS_PLAN.into())),
        "[a-z]{3,10}".prop_map(|id| UserPlan::from_id(&id)),
    ]
}

// ── Precedence ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn within_free_limits_is_allowed(
        cat in category(),
        size_frac in 0.0f64..=1.0,
        count_frac in 0.0f64..=1.0,
    ) {
        let pricing = PricingConfig::default();
        let limits = pricing.resolve(&ToolCategory::new(&cat), &UserPlan::Free).limits;
        let size = (limits.max_size_bytes as f64 * size_frac) as u64;
        let count = ((limits.max_file_count as f64 * count_frac) as u32).max(1);

        let req = Evaluator::new(pricing).check_payment_requirement(&cat, size, count, &UserPlan::Free);
        prop_assert!(!req.requires_payment());
        prop_assert_eq!(req.reason(), PaymentReason::None);
    }

    #[test]
    fn oversize_is_file_size_regardless_of_count(
        cat in category(),
        plan in plan(),
        excess in 1u64..=10 * 1024 * MIB,
        count in 1u32..=1000,
    ) {
        let evaluator = Evaluator::default();
        let limits = evaluator.pricing().resolve(&ToolCategory::new(&cat), &plan).limits;
        let req = evaluator.check_payment_requirement(&cat, limits.max_size_bytes + excess, count, &plan);
        prop_assert!(req.requires_payment());
        prop_assert_eq!(req.reason(), PaymentReason::FileSize);
    }

    #[test]
    fn over_count_within_size_is_batch(
        cat in category(),
        plan in plan(),
        extra in 1u32..=1000,
        size_frac in 0.0f64..=1.0,
    ) {
        let evaluator = Evaluator::default();
        let limits = evaluator.pricing().resolve(&ToolCategory::new(&cat), &plan).limits;
        let size = (limits.max_size_bytes as f64 * size_frac) as u64;
        let req = evaluator.check_payment_requirement(&cat, size, limits.max_file_count + extra, &plan);
        prop_assert_eq!(req.reason(), PaymentReason::Batch);
        prop_assert!(req.requires_payment());
    }

    #[test]
    fn requires_payment_iff_reason_is_not_none(
        cat in category(),
        plan in plan(),
        size in any::<u64>(),
        count in 1u32..=100,
    ) {
        let req = Evaluator::default().check_payment_requirement(&cat, size, count, &plan);
        prop_assert_eq!(req.requires_payment(), req.reason() != PaymentReason::None);
        prop_assert_eq!(req.file_size(), size);
        prop_assert_eq!(req.file_count(), count);
    }
}

// ── Idempotence and monotonicity ──────────────────────────────────────────

proptest! {
    #[test]
    fn evaluation_is_idempotent(
        cat in category(),
        plan in plan(),
        size in 0u64..=1024 * MIB,
        count in 1u32..=50,
    ) {
        let evaluator = Evaluator::default();
        let first = evaluator.check_payment_requirement(&cat, size, count, &plan);
        let second = evaluator.check_payment_requirement(&cat, size, count, &plan);
        prop_assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn elevated_plan_never_stricter_than_free(
        cat in category(),
        plan in plan(),
        size in 0u64..=1024 * MIB,
        count in 1u32..=50,
    ) {
        let evaluator = Evaluator::default();
        let free = evaluator.check_payment_requirement(&cat, size, count, &UserPlan::Free);
        if !free.requires_payment() {
            let elevated = evaluator.check_payment_requirement(&cat, size, count, &plan);
            prop_assert!(!elevated.requires_payment());
        }
    }

    #[test]
    fn raw_inputs_never_produce_invalid_requests(
        size in prop_oneof![any::<f64>(), Just(f64::NAN), Just(f64::NEG_INFINITY)],
        count in prop_oneof![any::<f64>(), Just(f64::NAN), Just(-1.0)],
    ) {
        let request = UsageRequest::from_raw("pdf", size, count, UserPlan::Free);
        prop_assert!(request.file_count >= 1);
        if size.is_nan() || size <= 0.0 {
            prop_assert_eq!(request.total_size_bytes, 0);
        }
        let req = Evaluator::default().evaluate(&request);
        prop_assert_eq!(req.requires_payment(), req.reason() != PaymentReason::None);
    }
}

// ── Expiry boundary ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn pass_is_honoured_strictly_before_expiry(offset_ms in -1_000_000i64..=1_000_000) {
        let expires = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let session = Session::with_pass(ProcessingPass {
            session_id: "cs_prop".into(),
            issued_at: None,
            expires_at: expires,
            plan: PASS_PLAN.into(),
        });
        let now = expires + Duration::milliseconds(offset_ms);
        let plan = get_user_plan(Some(&session), now);
        if now < expires {
            prop_assert_eq!(plan, UserPlan::Elevated(PASS_PLAN.into()));
        } else {
            prop_assert_eq!(plan, UserPlan::Free);
        }
    }
}

// ── Reference scenarios ───────────────────────────────────────────────────

#[test]
fn reference_scenarios() {
    let evaluator = Evaluator::default();
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

    // A: small PDF on the free tier.
    let a = evaluator.check_payment_requirement("pdf", 5 * MIB, 1, &UserPlan::Free);
    assert!(!a.requires_payment());

    // B: 150 MB PDF on the free tier.
    let b = evaluator.check_payment_requirement("pdf", 150 * MIB, 1, &UserPlan::Free);
    assert!(b.requires_payment());
    assert_eq!(b.reason(), PaymentReason::FileSize);

    // C: four small PDFs on the free tier.
    let c = evaluator.check_payment_requirement("pdf", 1024, 4, &UserPlan::Free);
    assert!(c.requires_payment());
    assert_eq!(c.reason(), PaymentReason::Batch);

    // D: same as C with an unexpired pass.
    let active = Session::with_pass(ProcessingPass {
        session_id: "cs_d".into(),
        issued_at: Some(now - Duration::hours(1)),
        expires_at: now + Duration::hours(23),
        plan: PASS_PLAN.into(),
    });
    let plan = get_user_plan(Some(&active), now);
    let d = evaluator.check_payment_requirement("pdf", 1024, 4, &plan);
    assert!(!d.requires_payment());

    // E: a pass that expired yesterday.
    let expired = Session::with_pass(ProcessingPass {
        session_id: "cs_e".into(),
        issued_at: Some(now - Duration::hours(48)),
        expires_at: now - Duration::hours(24),
        plan: PASS_PLAN.into(),
    });
    assert!(expired.processing_pass.is_some());
    assert_eq!(get_user_plan(Some(&expired), now), UserPlan::Free);
}
