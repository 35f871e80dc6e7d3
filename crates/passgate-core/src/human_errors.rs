// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-language messages for the tool pages.
//
// The evaluator only returns reason codes and numbers. Pages turn those into
// the payment prompt ("X exceeds the free limit of Y") with the helpers here,
// and map infrastructure errors to something a visitor can act on.

use crate::error::PassgateError;
use crate::types::{PaymentReason, PaymentRequirement};

/// Severity of a problem from the visitor's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Temporary; trying again may work.
    Transient,
    /// The visitor must change something (fewer files, a smaller batch).
    ActionRequired,
    /// Nothing the visitor can do fixes it.
    Permanent,
    /// A Processing Pass would unblock the operation.
    PurchaseRequired,
}

/// A message with a heading and an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain summary (shown as a heading).
    pub message: String,
    /// What the visitor should try (shown as body text).
    pub suggestion: String,
    /// Whether the page may retry automatically.
    pub retriable: bool,
    /// Drives icon/colour in the UI.
    pub severity: Severity,
}

/// Format a byte count with binary units, e.g. `150 MB` or `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value.fract() == 0.0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Describe why a requirement blocks, or `None` when it does not.
pub fn describe_requirement(requirement: &PaymentRequirement) -> Option<HumanError> {
    let plan_label = if requirement.user_plan().is_elevated() {
        format!("{} plan", requirement.user_plan())
    } else {
        "free".to_owned()
    };

    match requirement.reason() {
        PaymentReason::None => None,
        PaymentReason::FileSize => Some(HumanError {
            message: format!(
                "{} exceeds the {plan_label} limit of {}.",
                format_bytes(requirement.file_size()),
                format_bytes(requirement.max_file_size()),
            ),
            suggestion: upgrade_suggestion(requirement, "process larger files"),
            retriable: false,
            severity: Severity::PurchaseRequired,
        }),
        PaymentReason::Batch => Some(HumanError {
            message: format!(
                "{} files exceed the {plan_label} limit of {} per batch.",
                requirement.file_count(),
                requirement.max_file_count(),
            ),
            suggestion: upgrade_suggestion(requirement, "convert more files at once"),
            retriable: false,
            severity: Severity::PurchaseRequired,
        }),
    }
}

fn upgrade_suggestion(requirement: &PaymentRequirement, benefit: &str) -> String {
    if requirement.user_plan().is_elevated() {
        "This is above what your Processing Pass allows. Split the job into smaller batches."
            .into()
    } else {
        format!("Get a Processing Pass to {benefit}, or split the job into smaller batches.")
    }
}

/// Convert a `PassgateError` into a `HumanError`.
pub fn humanize_error(err: &PassgateError) -> HumanError {
    match err {
        PassgateError::Config(_) | PassgateError::InvalidPricing(_) => HumanError {
            message: "This tool is not configured correctly.".into(),
            suggestion: "Please try again later. The problem has been reported.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        PassgateError::InvalidPass(_) | PassgateError::SignatureMismatch => HumanError {
            message: "Your Processing Pass could not be verified.".into(),
            suggestion: "Reload the page. If you bought a pass, open the link from your receipt to restore it.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        PassgateError::Signing(_) => HumanError {
            message: "We couldn't issue your Processing Pass.".into(),
            suggestion: "Your payment went through. Open the link from your receipt to try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        PassgateError::Database(_) | PassgateError::Server(_) => HumanError {
            message: "The service had a problem.".into(),
            suggestion: "Please wait a moment and try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        PassgateError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "Passgate doesn't have permission to read its data.".into(),
                    suggestion: "Check the permissions of the data directory.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "Something went wrong reading or writing data.".into(),
                    suggestion: "Please try again.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        PassgateError::Serialization(_) | PassgateError::BadRequest(_) => HumanError {
            message: "The request couldn't be understood.".into(),
            suggestion: "Reload the page and select your files again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },
    }
}
