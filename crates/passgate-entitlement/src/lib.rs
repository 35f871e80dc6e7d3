// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// passgate-entitlement: decides whether a conversion may run for free.
//
// `plan` turns a stored session into a `UserPlan`, `evaluator` maps a usage
// request to a `PaymentRequirement`, and `guard` enforces the second
// evaluation immediately before a conversion is dispatched. Nothing here
// performs I/O or holds state between calls.

pub mod evaluator;
pub mod guard;
pub mod plan;

pub use evaluator::{Evaluator, check_payment_requirement};
pub use guard::{DispatchTicket, GateState, PendingOperation};
pub use plan::{current_user_plan, get_user_plan, parse_session};
