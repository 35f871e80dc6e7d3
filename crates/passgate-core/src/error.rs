// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Passgate.
//
// The entitlement evaluator itself never fails: these errors only arise at
// I/O boundaries (configuration files, the pass store, the audit database,
// the HTTP endpoint).

use thiserror::Error;

/// Top-level error type for all Passgate operations.
#[derive(Debug, Error)]
pub enum PassgateError {
    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid pricing table: {0}")]
    InvalidPricing(String),

    // -- Passes --
    #[error("invalid processing pass: {0}")]
    InvalidPass(String),

    #[error("pass signature does not match its contents")]
    SignatureMismatch,

    #[error("signing key error: {0}")]
    Signing(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Gate server --
    #[error("gate server error: {0}")]
    Server(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PassgateError>;
