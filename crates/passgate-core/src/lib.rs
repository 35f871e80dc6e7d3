// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Passgate -- Core types, pricing tables and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::{AppConfig, CategoryLimits, Limits, PricingConfig, ResolvedLimits};
pub use error::PassgateError;
pub use types::*;
