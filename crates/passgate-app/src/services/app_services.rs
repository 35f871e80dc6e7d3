// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens everything a command needs from the data
// directory.
//
// The decision log (rusqlite) is `Send` but not `Sync`, so it is wrapped in
// `Arc<Mutex<>>` and shared with the gate server's connection tasks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use passgate_core::AppConfig;
use passgate_core::config::PricingConfig;
use passgate_core::error::{PassgateError, Result};
use passgate_core::types::{EvaluationStage, PaymentRequirement, Session, SignedPass};
use passgate_entitlement::Evaluator;
use passgate_security::{
    DecisionEntry, DecisionLog, FilePassStore, PassSigner, session_fingerprint,
};
use passgate_server::{GateServer, PassIssuer};
use tracing::{error, info, warn};

const CONFIG_FILE: &str = "config.json";
const SIGNING_KEY_FILE: &str = "signing.key";
const DECISIONS_FILE: &str = "decisions.db";
const PASS_FILE: &str = "pass.json";

/// Shared services for the `passgate` commands.
#[derive(Clone)]
pub struct AppServices {
    data_dir: PathBuf,
    config: Arc<Mutex<AppConfig>>,
    signer: Arc<PassSigner>,
    decisions: Arc<Mutex<DecisionLog>>,
    pass_store: FilePassStore,
}

impl AppServices {
    /// Initialise all services rooted at `dir`, creating it if needed.
    pub fn init(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "initialising app services");
        std::fs::create_dir_all(dir)?;

        let config = match load_config(dir) {
            Some(config) => config,
            None => {
                let config = AppConfig::default();
                if !dir.join(CONFIG_FILE).exists() {
                    persist_config(dir, &config)?;
                }
                config
            }
        };

        let signer = PassSigner::load_or_generate(dir.join(SIGNING_KEY_FILE))?;

        let decisions = match DecisionLog::open(dir.join(DECISIONS_FILE)) {
            Ok(log) => log,
            Err(e) => {
                error!(error = %e, "decision log unavailable: using in-memory fallback");
                DecisionLog::open_in_memory()?
            }
        };

        Ok(Self {
            data_dir: dir.to_path_buf(),
            config: Arc::new(Mutex::new(config)),
            signer: Arc::new(signer),
            decisions: Arc::new(Mutex::new(decisions)),
            pass_store: FilePassStore::new(dir.join(PASS_FILE)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // -- Configuration -------------------------------------------------------

    pub fn config(&self) -> Result<AppConfig> {
        self.config
            .lock()
            .map(|config| config.clone())
            .map_err(|e| PassgateError::Config(format!("config lock poisoned: {e}")))
    }

    /// Apply `update`, validate the result, and persist it.
    pub fn update_config(&self, update: impl FnOnce(&mut AppConfig)) -> Result<()> {
        let mut config = self
            .config
            .lock()
            .map_err(|e| PassgateError::Config(format!("config lock poisoned: {e}")))?;
        let mut next = config.clone();
        update(&mut next);
        next.validate()?;
        persist_config(&self.data_dir, &next)?;
        *config = next;
        Ok(())
    }

    /// Replace the pricing table with the one in `path`.
    pub fn import_pricing(&self, path: &Path) -> Result<PricingConfig> {
        let pricing = PricingConfig::from_json_file(path)?;
        self.update_config(|config| config.pricing = pricing.clone())?;
        info!(path = %path.display(), categories = pricing.categories.len(), "pricing table imported");
        Ok(pricing)
    }

    pub fn evaluator(&self) -> Result<Evaluator> {
        Ok(Evaluator::new(self.config()?.pricing))
    }

    // -- Passes --------------------------------------------------------------

    pub fn pass_store(&self) -> &FilePassStore {
        &self.pass_store
    }

    pub fn session(&self) -> Session {
        self.pass_store.load_session()
    }

    /// Issue a pass locally, as a completed checkout would, and store it.
    pub fn issue_pass(
        &self,
        checkout_session_id: &str,
        plan: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignedPass> {
        let issuer = PassIssuer::new(Arc::clone(&self.signer), self.config()?.pass_duration_hours);
        let signed = issuer.issue(checkout_session_id, plan, now)?;
        self.pass_store.save(&signed)?;
        Ok(signed)
    }

    /// Whether the stored pass carries a signature from this installation's key.
    pub fn stored_pass_verifies(&self) -> Option<bool> {
        self.pass_store
            .load_signed()
            .map(|signed| self.signer.verify(&signed).is_ok())
    }

    // -- Decision log --------------------------------------------------------

    /// Record a decision. Failures are logged, never propagated: the log is
    /// an audit trail, not part of the verdict.
    pub fn record_decision(
        &self,
        stage: EvaluationStage,
        requirement: &PaymentRequirement,
        session: &Session,
    ) {
        let fingerprint = session
            .processing_pass
            .as_ref()
            .map(|pass| session_fingerprint(&pass.session_id));
        let outcome = match self.decisions.lock() {
            Ok(log) => log.record(stage, requirement, fingerprint.as_deref()),
            Err(e) => Err(PassgateError::Database(format!("decision log lock poisoned: {e}"))),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "failed to record decision");
        }
    }

    pub fn recent_decisions(&self, limit: u32) -> Result<Vec<DecisionEntry>> {
        self.decisions
            .lock()
            .map_err(|e| PassgateError::Database(format!("decision log lock poisoned: {e}")))?
            .recent_entries(limit)
    }

    // -- Gate server ---------------------------------------------------------

    /// A gate server for `config`, sharing this signer and decision log.
    pub fn gate_server(&self, config: &AppConfig) -> GateServer {
        GateServer::new(
            config,
            Arc::clone(&self.signer),
            Some(Arc::clone(&self.decisions)),
        )
    }
}

// ---------------------------------------------------------------------------
// Config persistence helpers
// ---------------------------------------------------------------------------

fn load_config(data_dir: &Path) -> Option<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    let config: AppConfig = match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return None;
        }
    };
    match config.validate() {
        Ok(()) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config invalid, using defaults");
            None
        }
    }
}

fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use passgate_core::types::PASS_PLAN;
    use passgate_entitlement::get_user_plan;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppServices::init(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(dir.path().join(SIGNING_KEY_FILE).exists());
        assert_eq!(svc.config().unwrap().server_port, 8402);
    }

    #[test]
    fn invalid_config_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"pass_duration_hours": 0}"#).unwrap();
        let svc = AppServices::init(dir.path()).unwrap();
        assert_eq!(svc.config().unwrap().pass_duration_hours, 24);
        let raw = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(raw.contains("\"pass_duration_hours\": 0"));
    }

    #[test]
    fn update_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppServices::init(dir.path()).unwrap();
        svc.update_config(|c| c.server_port = 9000).unwrap();
        assert!(svc.update_config(|c| c.pass_duration_hours = 0).is_err());

        let reopened = AppServices::init(dir.path()).unwrap();
        let config = reopened.config().unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.pass_duration_hours, 24);
    }

    #[test]
    fn issued_pass_is_stored_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppServices::init(dir.path()).unwrap();
        assert_eq!(svc.stored_pass_verifies(), None);

        let now = Utc::now();
        svc.issue_pass("cs_local", None, now).unwrap();
        assert_eq!(svc.stored_pass_verifies(), Some(true));

        let session = svc.session();
        assert_eq!(get_user_plan(Some(&session), now).as_str(), PASS_PLAN);
        assert!(!get_user_plan(Some(&session), now + Duration::hours(24)).is_elevated());
    }

    #[test]
    fn decisions_are_recorded_with_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppServices::init(dir.path()).unwrap();
        svc.issue_pass("cs_audit", None, Utc::now()).unwrap();

        let session = svc.session();
        let requirement = svc
            .evaluator()
            .unwrap()
            .check_payment_requirement("pdf", 1, 1, &passgate_core::UserPlan::Free);
        svc.record_decision(EvaluationStage::Dispatch, &requirement, &session);

        let recent = svc.recent_decisions(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(
            recent[0].session_fingerprint.as_deref(),
            Some(session_fingerprint("cs_audit").as_str())
        );
    }

    #[test]
    fn import_pricing_validates() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppServices::init(dir.path()).unwrap();

        let bad = dir.path().join("bad.json");
        std::fs::write(
            &bad,
            r#"{"categories":{"pdf":{"free":{"max_size_bytes":0,"max_file_count":1}}},
                "fallback":{"free":{"max_size_bytes":1,"max_file_count":1}}}"#,
        )
        .unwrap();
        assert!(svc.import_pricing(&bad).is_err());

        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"categories":{" Audio ":{"free":{"max_size_bytes":5,"max_file_count":2}}},
                "fallback":{"free":{"max_size_bytes":1,"max_file_count":1}}}"#,
        )
        .unwrap();
        let pricing = svc.import_pricing(&good).unwrap();
        assert!(pricing.categories.contains_key("audio"));
        assert!(svc.config().unwrap().pricing.categories.contains_key("audio"));
    }
}
