// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User plan resolution from a stored session.

use chrono::{DateTime, Utc};
use passgate_core::types::{Session, UserPlan};
use tracing::debug;

/// Parse the raw session text read from client storage.
///
/// Missing or corrupt storage degrades to an anonymous session; this never
/// fails.
pub fn parse_session(raw: Option<&str>) -> Session {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Session::anonymous();
    };

    let session = Session::from_json(raw);
    if session.processing_pass.is_none() && raw.contains("processingPass") {
        debug!("stored processing pass is malformed, treating caller as free");
    }
    session
}

/// The plan a caller is entitled to at `now`.
///
/// Returns [`UserPlan::Free`] when there is no session, no pass, the pass
/// has expired (`now >= expiresAt`), or the pass carries an empty session id
/// or plan. Never touches the stored session; clearing stale passes is up to
/// the caller.
pub fn get_user_plan(session: Option<&Session>, now: DateTime<Utc>) -> UserPlan {
    let Some(pass) = session.and_then(|s| s.processing_pass.as_ref()) else {
        return UserPlan::Free;
    };

    if pass.session_id.trim().is_empty() {
        debug!("processing pass has no session id, treating caller as free");
        return UserPlan::Free;
    }

    if !pass.is_active_at(now) {
        debug!(expires_at = %pass.expires_at, "processing pass expired");
        return UserPlan::Free;
    }

    pass.granted_plan()
}

/// [`get_user_plan`] against the wall clock.
pub fn current_user_plan(session: Option<&Session>) -> UserPlan {
    get_user_plan(session, Utc::now())
}
