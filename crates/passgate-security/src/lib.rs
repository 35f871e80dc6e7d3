// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! passgate-security: trust boundary around Processing Passes.
//!
//! Client-held passes are trivially editable, so the server only honours
//! passes carrying a valid HMAC from [`PassSigner`]. Every server-side
//! evaluation is written to the [`DecisionLog`], keyed by a SHA-256
//! fingerprint of the checkout session rather than the raw id.
//! [`FilePassStore`] is the client-side persistence for a signed pass.

pub mod audit;
pub mod integrity;
pub mod signing;
pub mod storage;

// PUBLIC API: Re-export the trust primitives
pub use audit::{DecisionEntry, DecisionLog};
pub use integrity::{hash_bytes, session_fingerprint};
pub use signing::PassSigner;
pub use storage::FilePassStore;
