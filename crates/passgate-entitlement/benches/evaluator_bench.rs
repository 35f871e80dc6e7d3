// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for session parsing and payment requirement checks.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use chrono::Utc;
use passgate_core::types::UserPlan;
use passgate_entitlement::{Evaluator, get_user_plan, parse_session};

/// Evaluate a known category, an unknown one, and a pass holder.
fn bench_check_payment_requirement(c: &mut Criterion) {
    let evaluator = Evaluator::default();
    let pass = UserPlan::Elevated("pass".into());

    let mut group = c.benchmark_group("check_payment_requirement");
    group.bench_function("pdf free", |b| {
        b.iter(|| {
            evaluator.check_payment_requirement(
                black_box("pdf"),
                black_box(5 * 1024 * 1024),
                black_box(2),
                &UserPlan::Free,
            )
        });
    });
    group.bench_function("unknown category", |b| {
        b.iter(|| {
            evaluator.check_payment_requirement(
                black_box("video"),
                black_box(5 * 1024 * 1024),
                black_box(2),
                &UserPlan::Free,
            )
        });
    });
    group.bench_function("pdf pass", |b| {
        b.iter(|| evaluator.check_payment_requirement(black_box("pdf"), 1024, 12, &pass));
    });
    group.finish();
}

/// Parse a stored browser session and resolve the plan.
fn bench_session_to_plan(c: &mut Criterion) {
    let expires = (Utc::now() + chrono::Duration::hours(12)).timestamp_millis();
    let raw = format!(
        r#"{{"processingPass":{{"sessionId":"cs_bench","expiresAt":{expires},"plan":"pass","signature":"00"}}}}"#
    );

    c.bench_function("parse_session + get_user_plan", |b| {
        b.iter(|| {
            let session = parse_session(Some(black_box(&raw)));
            black_box(get_user_plan(Some(&session), Utc::now()))
        });
    });
}

criterion_group!(benches, bench_check_payment_requirement, bench_session_to_plan);
criterion_main!(benches);
