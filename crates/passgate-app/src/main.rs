// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Passgate: usage gating and Processing Pass entitlements
//
// Entry point. Initialises logging and backend services, then runs one
// subcommand. Machine-readable output goes to stdout, logs to stderr.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use passgate_core::error::Result;
use passgate_core::human_errors::{describe_requirement, humanize_error};
use passgate_core::types::{EvaluationStage, PaymentRequirement};
use passgate_entitlement::{PendingOperation, current_user_plan};
use serde::Serialize;

use services::app_services::AppServices;
use services::data_dir;

/// Exit status when the operation needs a Processing Pass.
const EXIT_PAYMENT_REQUIRED: u8 = 2;

#[derive(Parser)]
#[command(name = "passgate")]
#[command(about = "Usage gating and Processing Pass entitlements for conversion tools")]
#[command(version)]
struct Cli {
    /// Data directory (default: $PASSGATE_DATA_DIR, then the XDG data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gate server until interrupted
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on, 0 for any (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Evaluate a conversion against the stored pass
    Check {
        /// Tool category (pdf, image, web-tools, ...); omit for the fallback limits
        #[arg(long)]
        category: Option<String>,

        /// Total size of all inputs, in bytes
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        size: f64,

        /// Number of files or URLs in the batch
        #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
        count: f64,
    },

    /// Print the pricing table, optionally replacing it first
    Pricing {
        /// JSON pricing table to validate and store
        #[arg(long)]
        import: Option<PathBuf>,
    },

    /// Inspect or manage the stored Processing Pass
    Pass {
        #[command(subcommand)]
        action: PassAction,
    },

    /// Show recent entitlement decisions
    Decisions {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum PassAction {
    /// Show the stored pass and the plan it grants now
    Show,
    /// Delete the stored pass
    Clear,
    /// Delete the stored pass if it has expired or is malformed
    Prune,
    /// Mint and store a pass as if a checkout had completed
    Issue {
        /// Checkout session id the pass is bound to
        #[arg(long)]
        session_id: String,

        /// Plan to grant (default: pass)
        #[arg(long)]
        plan: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let dir = cli.data_dir.unwrap_or_else(data_dir::data_dir);

    let outcome = match AppServices::init(&dir) {
        Ok(svc) => run(cli.command, &svc).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            let human = humanize_error(&e);
            tracing::error!(error = %e, "command failed");
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, svc: &AppServices) -> Result<ExitCode> {
    match command {
        Command::Serve { bind, port } => serve(svc, bind, port).await,
        Command::Check {
            category,
            size,
            count,
        } => check(svc, category.unwrap_or_default(), size, count),
        Command::Pricing { import } => {
            let pricing = match import {
                Some(path) => svc.import_pricing(&path)?,
                None => svc.config()?.pricing,
            };
            print_json(&pricing)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Pass { action } => pass(svc, action),
        Command::Decisions { limit } => {
            print_json(&svc.recent_decisions(limit)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(svc: &AppServices, bind: Option<String>, port: Option<u16>) -> Result<ExitCode> {
    let mut config = svc.config()?;
    if let Some(bind) = bind {
        config.bind_address = bind;
    }
    if let Some(port) = port {
        config.server_port = port;
    }

    let mut server = svc.gate_server(&config);
    server.start().await?;
    tracing::info!(
        addr = ?server.local_addr(),
        data_dir = %svc.data_dir().display(),
        "Passgate serving; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    server.stop().await?;
    Ok(ExitCode::SUCCESS)
}

/// Run the selection and pre-dispatch evaluations back to back, the way a
/// tool page does, and report the pre-dispatch verdict.
fn check(svc: &AppServices, category: String, size: f64, count: f64) -> Result<ExitCode> {
    let evaluator = svc.evaluator()?;
    let session = svc.session();
    let mut op = PendingOperation::from_raw(category, size, count);

    if let Some(requirement) = op
        .on_selection(&evaluator, Some(&session), Utc::now())
        .requirement()
    {
        svc.record_decision(EvaluationStage::Selection, requirement, &session);
    }

    match op.before_dispatch(&evaluator, Some(&session), Utc::now()) {
        Ok(ticket) => {
            svc.record_decision(EvaluationStage::Dispatch, ticket.requirement(), &session);
            print_json(ticket.requirement())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(requirement) => {
            svc.record_decision(EvaluationStage::Dispatch, &requirement, &session);
            print_json(&requirement)?;
            print_prompt(&requirement);
            Ok(ExitCode::from(EXIT_PAYMENT_REQUIRED))
        }
    }
}

fn print_prompt(requirement: &PaymentRequirement) {
    if let Some(human) = describe_requirement(requirement) {
        eprintln!("{}\n{}", human.message, human.suggestion);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PassReport {
    stored: bool,
    plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature_valid: Option<bool>,
}

fn pass(svc: &AppServices, action: PassAction) -> Result<ExitCode> {
    match action {
        PassAction::Show => {
            let session = svc.session();
            let report = PassReport {
                stored: session.processing_pass.is_some(),
                plan: current_user_plan(Some(&session)).to_string(),
                expires_at: session
                    .processing_pass
                    .as_ref()
                    .map(|pass| pass.expires_at.to_rfc3339()),
                signature_valid: svc.stored_pass_verifies(),
            };
            print_json(&report)?;
        }
        PassAction::Clear => {
            let removed = svc.pass_store().clear()?;
            println!("{}", if removed { "pass removed" } else { "no pass stored" });
        }
        PassAction::Prune => {
            let removed = svc.pass_store().prune_expired(Utc::now())?;
            println!("{}", if removed { "stale pass removed" } else { "nothing to prune" });
        }
        PassAction::Issue { session_id, plan } => {
            let signed = svc.issue_pass(&session_id, plan.as_deref(), Utc::now())?;
            print_json(&signed)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
