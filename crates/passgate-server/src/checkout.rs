// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pass issuance after a completed checkout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use passgate_core::error::{PassgateError, Result};
use passgate_core::types::{PASS_PLAN, ProcessingPass, SignedPass, UserPlan};
use passgate_security::PassSigner;
use tracing::info;

/// Mints signed Processing Passes of a fixed lifetime.
#[derive(Clone)]
pub struct PassIssuer {
    signer: Arc<PassSigner>,
    lifetime: Duration,
}

impl PassIssuer {
    pub fn new(signer: Arc<PassSigner>, pass_duration_hours: u32) -> Self {
        Self {
            signer,
            lifetime: Duration::hours(i64::from(pass_duration_hours)),
        }
    }

    /// Issue a pass for `checkout_session_id`, valid from `now` for the
    /// configured lifetime. A missing plan means the standard `pass` plan.
    pub fn issue(
        &self,
        checkout_session_id: &str,
        plan: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignedPass> {
        let session_id = checkout_session_id.trim();
        if session_id.is_empty() {
            return Err(PassgateError::InvalidPass(
                "checkout session id is empty".into(),
            ));
        }

        let plan = match plan.map(str::trim).filter(|p| !p.is_empty()) {
            None => PASS_PLAN.to_owned(),
            Some(p) => match UserPlan::from_id(p) {
                UserPlan::Free => {
                    return Err(PassgateError::InvalidPass(
                        "cannot issue a pass for the free plan".into(),
                    ));
                }
                elevated => elevated.as_str().to_owned(),
            },
        };

        let pass = ProcessingPass {
            session_id: session_id.to_owned(),
            issued_at: Some(now),
            expires_at: now + self.lifetime,
            plan,
        };
        info!(plan = %pass.plan, expires_at = %pass.expires_at, "processing pass issued");
        Ok(self.signer.sign(pass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issuer() -> PassIssuer {
        let signer = PassSigner::from_key(&[3u8; PassSigner::KEY_LEN]).unwrap();
        PassIssuer::new(Arc::new(signer), 24)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn issues_day_pass_by_default() {
        let signed = issuer().issue(" cs_test_1 ", None, now()).unwrap();
        assert_eq!(signed.pass.session_id, "cs_test_1");
        assert_eq!(signed.pass.plan, PASS_PLAN);
        assert_eq!(signed.pass.issued_at, Some(now()));
        assert_eq!(signed.pass.expires_at, now() + Duration::hours(24));
    }

    #[test]
    fn issued_pass_verifies() {
        let issuer = issuer();
        let signed = issuer.issue("cs_test_2", Some("pro"), now()).unwrap();
        assert_eq!(signed.pass.plan, "pro");
        issuer.signer.verify(&signed).unwrap();
    }

    #[test]
    fn rejects_blank_session_and_free_plan() {
        let issuer = issuer();
        assert!(matches!(
            issuer.issue("  ", None, now()),
            Err(PassgateError::InvalidPass(_))
        ));
        assert!(matches!(
            issuer.issue("cs_1", Some("FREE"), now()),
            Err(PassgateError::InvalidPass(_))
        ));
    }
}
