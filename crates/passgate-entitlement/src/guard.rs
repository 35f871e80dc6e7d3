// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Re-check-before-use for pending conversions.
//
// A page evaluates when files are selected (to show the prompt early) and
// again right before it sends the conversion request, because a pass can
// expire while the page sits open. Only the second verdict counts: dispatch
// code takes a `DispatchTicket`, and the only way to obtain one is
// `PendingOperation::before_dispatch`.

use chrono::{DateTime, Utc};
use passgate_core::types::{
    PaymentRequirement, Session, ToolCategory, UsageRequest, clamp_count, clamp_size,
};
use tracing::{debug, info};

use crate::evaluator::Evaluator;
use crate::plan::get_user_plan;

/// Gate state of a pending operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Not evaluated yet.
    Unevaluated,
    /// Within the caller's limits.
    Allowed(PaymentRequirement),
    /// A payment is needed; the requirement says why.
    Blocked(PaymentRequirement),
}

impl GateState {
    fn from_requirement(requirement: PaymentRequirement) -> Self {
        if requirement.requires_payment() {
            Self::Blocked(requirement)
        } else {
            Self::Allowed(requirement)
        }
    }

    pub fn requirement(&self) -> Option<&PaymentRequirement> {
        match self {
            Self::Unevaluated => None,
            Self::Allowed(req) | Self::Blocked(req) => Some(req),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Proof that the pre-dispatch evaluation allowed the operation.
#[derive(Debug, Clone)]
pub struct DispatchTicket {
    requirement: PaymentRequirement,
    evaluated_at: DateTime<Utc>,
}

impl DispatchTicket {
    pub fn requirement(&self) -> &PaymentRequirement {
        &self.requirement
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }
}

/// A conversion the visitor has set up but not yet sent.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    tool_category: ToolCategory,
    total_size_bytes: u64,
    file_count: u32,
    state: GateState,
}

impl PendingOperation {
    pub fn new(tool_category: impl Into<ToolCategory>, total_size_bytes: u64, file_count: u32) -> Self {
        Self {
            tool_category: tool_category.into(),
            total_size_bytes,
            file_count: file_count.max(1),
            state: GateState::Unevaluated,
        }
    }

    /// Build from untrusted numbers, clamping them first.
    pub fn from_raw(tool_category: impl Into<ToolCategory>, total_size_bytes: f64, file_count: f64) -> Self {
        Self::new(tool_category, clamp_size(total_size_bytes), clamp_count(file_count))
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    fn evaluate(
        &self,
        evaluator: &Evaluator,
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> PaymentRequirement {
        let plan = get_user_plan(session, now);
        let request = UsageRequest::new(
            self.tool_category.clone(),
            self.total_size_bytes,
            self.file_count,
            plan,
        );
        evaluator.evaluate(&request)
    }

    /// Evaluate when files are selected. Informational: the page may show the
    /// payment prompt early, but this verdict never authorises dispatch.
    pub fn on_selection(
        &mut self,
        evaluator: &Evaluator,
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> &GateState {
        let requirement = self.evaluate(evaluator, session, now);
        self.state = GateState::from_requirement(requirement);
        &self.state
    }

    /// Evaluate again immediately before sending the conversion request.
    ///
    /// Returns a ticket when allowed, or the blocking requirement otherwise.
    pub fn before_dispatch(
        &mut self,
        evaluator: &Evaluator,
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> Result<DispatchTicket, PaymentRequirement> {
        let requirement = self.evaluate(evaluator, session, now);
        let next = GateState::from_requirement(requirement.clone());

        match (&self.state, &next) {
            (GateState::Allowed(_), GateState::Blocked(req)) => {
                info!(
                    category = %self.tool_category,
                    reason = %req.reason(),
                    "entitlement lapsed between selection and dispatch"
                );
            }
            (GateState::Blocked(_), GateState::Allowed(_)) => {
                debug!(category = %self.tool_category, "operation unblocked since selection");
            }
            _ => {}
        }
        self.state = next;

        if requirement.requires_payment() {
            Err(requirement)
        } else {
            Ok(DispatchTicket {
                requirement,
                evaluated_at: now,
            })
        }
    }
}
