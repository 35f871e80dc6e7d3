// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client-side pass storage: the on-disk equivalent of the browser's
// `localStorage` session entry.
//
// The file holds `{"processingPass": { ...signed pass fields... }}`, the same
// shape pages keep in the browser, so `Session` parsing works unchanged.
// The evaluator never writes here; expiry cleanup is the caller's job via
// `prune_expired`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use passgate_core::error::Result;
use passgate_core::types::{Session, SignedPass};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    processing_pass: SignedPass,
}

/// A signed pass persisted to a single JSON file.
#[derive(Debug, Clone)]
pub struct FilePassStore {
    path: PathBuf,
}

impl FilePassStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, "pass store unreadable, treating as empty");
                None
            }
        }
    }

    /// The stored session. Missing or corrupt files yield an anonymous session.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load_session(&self) -> Session {
        match self.read_raw() {
            Some(raw) => Session::from_json(&raw),
            None => Session::anonymous(),
        }
    }

    /// The stored pass with its signature, if present and well-formed.
    pub fn load_signed(&self) -> Option<SignedPass> {
        let raw = self.read_raw()?;
        match serde_json::from_str::<StoredSession>(&raw) {
            Ok(stored) => Some(stored.processing_pass),
            Err(e) => {
                debug!(error = %e, "stored pass has no valid signature block");
                None
            }
        }
    }

    /// Persist `signed`, replacing any previous pass.
    ///
    /// Written to a sibling temp file and renamed so readers never see a
    /// half-written pass.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn save(&self, signed: &SignedPass) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&StoredSession {
            processing_pass: signed.clone(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("pass saved");
        Ok(())
    }

    /// Remove the stored pass. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the stored pass if it has expired at `now` or is unreadable.
    ///
    /// Returns whether anything was removed.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        if self.read_raw().is_none() {
            return Ok(false);
        }
        let keep = self
            .load_session()
            .processing_pass
            .is_some_and(|pass| pass.is_active_at(now));
        if keep {
            return Ok(false);
        }
        debug!("removing expired or malformed pass");
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use passgate_core::types::{PASS_PLAN, ProcessingPass};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap()
    }

    fn signed(expires_at: DateTime<Utc>) -> SignedPass {
        SignedPass {
            pass: ProcessingPass {
                session_id: "cs_store".into(),
                issued_at: Some(expires_at - Duration::hours(24)),
                expires_at,
                plan: PASS_PLAN.into(),
            },
            signature: "ab".repeat(32),
        }
    }

    fn store() -> (tempfile::TempDir, FilePassStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePassStore::new(dir.path().join("session.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_is_anonymous() {
        let (_dir, store) = store();
        assert_eq!(store.load_session(), Session::anonymous());
        assert!(store.load_signed().is_none());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn save_and_load() {
        let (_dir, store) = store();
        let pass = signed(now() + Duration::hours(3));
        store.save(&pass).unwrap();

        assert_eq!(store.load_signed(), Some(pass.clone()));
        assert_eq!(store.load_session().processing_pass, Some(pass.pass));
    }

    #[test]
    fn corrupt_file_is_anonymous_and_pruned() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{\"processingPass\": 42").unwrap();
        assert_eq!(store.load_session(), Session::anonymous());
        assert!(store.prune_expired(now()).unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn prune_keeps_active_pass() {
        let (_dir, store) = store();
        store.save(&signed(now() + Duration::minutes(1))).unwrap();
        assert!(!store.prune_expired(now()).unwrap());
        assert!(store.path().exists());
    }

    #[test]
    fn prune_removes_expired_pass() {
        let (_dir, store) = store();
        store.save(&signed(now())).unwrap();
        assert!(store.prune_expired(now()).unwrap());
        assert_eq!(store.load_session(), Session::anonymous());
    }

    #[test]
    fn unsigned_browser_entry_loads_as_session_only() {
        let (_dir, store) = store();
        std::fs::write(
            store.path(),
            r#"{"processingPass":{"sessionId":"cs_x","expiresAt":1893456000000,"plan":"pass"}}"#,
        )
        .unwrap();
        assert!(store.load_session().processing_pass.is_some());
        assert!(store.load_signed().is_none());
    }
}
