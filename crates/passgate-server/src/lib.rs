// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// passgate-server -- HTTP gate for conversion backends: authoritative
// entitlement checks against signed passes, plus pass issuance after checkout.

pub mod checkout;
pub mod gate_server;
pub mod http;

pub use checkout::PassIssuer;
pub use gate_server::{GateContext, GateServer, ServerStatus};
