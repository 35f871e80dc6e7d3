// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gate server -- server-side re-evaluation of conversion requests.
//
// The browser-side gate is advisory: anyone can edit their stored pass. The
// conversion backend asks this server instead, sending the request shape and
// the signed pass the client holds. Only passes whose HMAC verifies are
// honoured; everything else is evaluated as the free tier.
//
// # Endpoints
//
//   POST /api/check              -> 200 allowed | 402 payment required
//   POST /api/checkout/complete  -> 200 {"processingPass": {...signed...}}
//   GET  /api/pricing            -> 200 pricing table
//   GET  /health                 -> 200 {"status": "ok", ...}
//
// Malformed bodies get 400, unknown paths 404, wrong methods 405, and
// bodies over `MAX_BODY_BYTES` 413.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use passgate_core::config::AppConfig;
use passgate_core::error::{PassgateError, Result};
use passgate_core::types::{
    EvaluationStage, PaymentRequirement, Session, SignedPass, UsageRequest, clamp_count,
    clamp_size,
};
use passgate_entitlement::{Evaluator, get_user_plan};
use passgate_security::{DecisionLog, PassSigner, session_fingerprint};

use crate::checkout::PassIssuer;
use crate::http::{self, HttpRequest, HttpResponse, RequestError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

fn one() -> f64 {
    1.0
}

/// Read any JSON value as a raw number. Anything that is not a number,
/// including the `null` a browser sends for NaN or Infinity, reads as NaN
/// and is left to the clamps.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(f64::NAN))
}

/// Body of `POST /api/check`.
///
/// Size and count are taken as raw JSON values and clamped, the same as
/// the values a page reads from its file inputs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckBody {
    #[serde(default)]
    tool_category: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_size_bytes: f64,
    #[serde(default = "one", deserialize_with = "lenient_number")]
    file_count: f64,
    /// Kept as raw JSON so a malformed pass degrades to free instead of
    /// failing the whole request.
    #[serde(default)]
    pass: Option<serde_json::Value>,
}

/// Body of `POST /api/checkout/complete`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    checkout_session_id: String,
    #[serde(default)]
    plan: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResponse {
    processing_pass: SignedPass,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_connections: u32,
}

// ---------------------------------------------------------------------------
// Server status
// ---------------------------------------------------------------------------

/// Lifecycle state of the gate server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
}

/// A decision waiting to be written to the audit log.
struct AuditRecord {
    requirement: PaymentRequirement,
    fingerprint: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

/// State shared across all connection-handling tasks.
pub struct GateContext {
    evaluator: Evaluator,
    signer: Arc<PassSigner>,
    issuer: PassIssuer,
    /// `None` when auditing is disabled.
    decisions: Option<Arc<Mutex<DecisionLog>>>,
    active_connections: AtomicU32,
}

impl GateContext {
    pub fn new(
        config: &AppConfig,
        signer: Arc<PassSigner>,
        decisions: Option<Arc<Mutex<DecisionLog>>>,
    ) -> Self {
        Self {
            evaluator: Evaluator::new(config.pricing.clone()),
            issuer: PassIssuer::new(Arc::clone(&signer), config.pass_duration_hours),
            signer,
            decisions: decisions.filter(|_| config.audit_enabled),
            active_connections: AtomicU32::new(0),
        }
    }

    /// Route one request and record its decision inline. `now` is the
    /// evaluation instant.
    pub fn handle(&self, request: &HttpRequest, now: DateTime<Utc>) -> HttpResponse {
        let (response, audit) = self.route(request, now);
        if let Some(audit) = audit {
            self.record(&audit);
        }
        response
    }

    /// Route one request. The audit write, if any, is left to the caller.
    fn route(
        &self,
        request: &HttpRequest,
        now: DateTime<Utc>,
    ) -> (HttpResponse, Option<AuditRecord>) {
        if request.method == "POST" && request.path == "/api/check" {
            return self.handle_check(&request.body, now);
        }

        let response = match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/api/checkout/complete") => self.handle_checkout(&request.body, now),
            ("GET", "/api/pricing") => HttpResponse::json(200, self.evaluator.pricing()),
            ("GET", "/health") => HttpResponse::json(
                200,
                &HealthResponse {
                    status: "ok",
                    version: env!("CARGO_PKG_VERSION"),
                    active_connections: self.active_connections.load(Ordering::Relaxed),
                },
            ),
            (_, "/api/check" | "/api/checkout/complete") => {
                HttpResponse::error(405, "method not allowed").with_header("Allow", "POST")
            }
            (_, "/api/pricing" | "/health") => {
                HttpResponse::error(405, "method not allowed").with_header("Allow", "GET")
            }
            (_, path) => HttpResponse::error(404, &format!("no route for {path}")),
        };
        (response, None)
    }

    fn handle_check(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> (HttpResponse, Option<AuditRecord>) {
        let body: CheckBody = match serde_json::from_slice(body) {
            Ok(body) => body,
            Err(e) => {
                let e = PassgateError::BadRequest(format!("invalid check request: {e}"));
                return (error_response(&e), None);
            }
        };

        let verified = body.pass.and_then(|raw| self.verified_pass(raw));
        let fingerprint = verified
            .as_ref()
            .map(|signed| session_fingerprint(&signed.pass.session_id));
        let session = verified.map(|signed| Session::with_pass(signed.pass));
        let plan = get_user_plan(session.as_ref(), now);

        let requirement = match body.tool_category {
            Some(category) => {
                let request =
                    UsageRequest::from_raw(category, body.total_size_bytes, body.file_count, plan);
                self.evaluator.evaluate(&request)
            }
            None => self.evaluator.check_uncategorized(
                clamp_size(body.total_size_bytes),
                clamp_count(body.file_count),
                &plan,
            ),
        };

        let status = if requirement.requires_payment() { 402 } else { 200 };
        let response = HttpResponse::json(status, &requirement);
        let audit = self.decisions.is_some().then_some(AuditRecord {
            requirement,
            fingerprint,
        });
        (response, audit)
    }

    /// Parse and verify a client-supplied pass. Any failure yields `None`.
    fn verified_pass(&self, raw: serde_json::Value) -> Option<SignedPass> {
        let signed: SignedPass = match serde_json::from_value(raw) {
            Ok(signed) => signed,
            Err(e) => {
                debug!(error = %e, "unparseable pass in check request");
                return None;
            }
        };
        match self.signer.verify(&signed) {
            Ok(()) => Some(signed),
            Err(e) => {
                warn!(error = %e, "rejected pass in check request");
                None
            }
        }
    }

    /// Blocking SQLite write. Failures are logged and never change a verdict.
    fn record(&self, audit: &AuditRecord) {
        let Some(decisions) = &self.decisions else {
            return;
        };
        let outcome = match decisions.lock() {
            Ok(log) => log.record(
                EvaluationStage::Server,
                &audit.requirement,
                audit.fingerprint.as_deref(),
            ),
            Err(e) => Err(PassgateError::Database(format!("decision log lock poisoned: {e}"))),
        };
        if let Err(e) = outcome {
            error!(error = %e, "failed to record decision");
        }
    }

    fn handle_checkout(&self, body: &[u8], now: DateTime<Utc>) -> HttpResponse {
        let body: CheckoutBody = match serde_json::from_slice(body) {
            Ok(body) => body,
            Err(e) => {
                return error_response(&PassgateError::BadRequest(format!(
                    "invalid checkout request: {e}"
                )));
            }
        };

        match self
            .issuer
            .issue(&body.checkout_session_id, body.plan.as_deref(), now)
        {
            Ok(processing_pass) => {
                HttpResponse::json(200, &CheckoutResponse { processing_pass })
            }
            Err(e) => error_response(&e),
        }
    }
}

/// Map a handler error to its HTTP status.
fn error_response(e: &PassgateError) -> HttpResponse {
    let status = match e {
        PassgateError::BadRequest(_) | PassgateError::InvalidPass(_) => 400,
        _ => 500,
    };
    HttpResponse::error(status, &e.to_string())
}

// ---------------------------------------------------------------------------
// GateServer
// ---------------------------------------------------------------------------

/// Embedded HTTP gate server.
///
/// Binds a TCP listener and answers entitlement checks from the conversion
/// backend. One request per connection.
pub struct GateServer {
    bind_address: String,
    port: u16,
    status: ServerStatus,
    local_addr: Option<SocketAddr>,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    context: Arc<GateContext>,
}

impl GateServer {
    /// Create a server for `config`. Starts in `Stopped` state.
    pub fn new(
        config: &AppConfig,
        signer: Arc<PassSigner>,
        decisions: Option<Arc<Mutex<DecisionLog>>>,
    ) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.server_port,
            status: ServerStatus::Stopped,
            local_addr: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            context: Arc::new(GateContext::new(config, signer, decisions)),
        }
    }

    /// Configured port (0 means ephemeral until started).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Address actually bound, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.context.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    #[instrument(skip_all, fields(bind = %self.bind_address, port = self.port))]
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.port, "gate server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;

        let bind_addr = format!("{}:{}", self.bind_address, self.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Stopped;
                return Err(PassgateError::Server(format!("bind {bind_addr}: {e}")));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| PassgateError::Server(format!("local address: {e}")))?;

        info!(addr = %local_addr, "gate server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let context = Arc::clone(&self.context);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, context).await;
        });

        self.local_addr = Some(local_addr);
        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Signal the accept loop to exit and wait for it. In-flight requests
    /// run to completion in their own tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping gate server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| PassgateError::Server(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!("gate server stopped");
        Ok(())
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, context: Arc<GateContext>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let context = Arc::clone(&context);
                            let span = info_span!("request", id = %Uuid::new_v4(), peer = %peer_addr);
                            tokio::spawn(
                                async move {
                                    context.active_connections.fetch_add(1, Ordering::Relaxed);
                                    if let Err(e) = Self::handle_connection(stream, Arc::clone(&context)).await {
                                        warn!(error = %e, "connection handler error");
                                    }
                                    context.active_connections.fetch_sub(1, Ordering::Relaxed);
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(mut stream: TcpStream, context: Arc<GateContext>) -> Result<()> {
        let response = match http::read_request(&mut stream).await {
            Ok(request) => {
                let (response, audit) = context.route(&request, Utc::now());
                info!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    "request handled"
                );
                if let Some(audit) = audit {
                    let context = Arc::clone(&context);
                    let write = tokio::task::spawn_blocking(move || context.record(&audit));
                    if let Err(e) = write.await {
                        error!(error = %e, "audit task failed");
                    }
                }
                response
            }
            Err(RequestError::Empty) => {
                debug!("empty connection -- closing");
                return Ok(());
            }
            Err(RequestError::Io(e)) => {
                return Err(PassgateError::Server(format!("read request: {e}")));
            }
            Err(e @ RequestError::TooLarge { .. }) => {
                warn!(error = %e, "request refused");
                HttpResponse::error(413, &e.to_string())
            }
            Err(e @ RequestError::Malformed(_)) => {
                warn!(error = %e, "malformed request");
                HttpResponse::error(400, &e.to_string())
            }
        };

        http::write_response(&mut stream, &response)
            .await
            .map_err(|e| PassgateError::Server(format!("write response: {e}")))
    }
}
