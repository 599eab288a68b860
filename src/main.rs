//! Speakeasy CLI
//!
//! "Knock and it shall be opened" - Matthew 7:7-8

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use speakeasy::{
    clock::{Clock, SystemClock},
    config::{Args, Commands},
    doorman::{Doorman, DoormanConfig},
    gesture::{GestureCapture, GestureSequence},
    logging::AuditLogger,
    store::{DeviceSecret, FileBackend, VerifierStore},
    verifier::GestureVerifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so stdout stays machine readable
    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("speakeasy={},info", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Speakeasy");
    info!("  \"Knock and it shall be opened\"");
    info!("======================================");
    info!("Store: {}", args.store_dir.display());
    info!("Device secret: {}", args.device_secret_path().display());
    info!(
        "KDF: argon2id m={}KiB t={} p={}",
        args.kdf_memory_kib, args.kdf_iterations, args.kdf_parallelism
    );
    info!("======================================");

    let backend = FileBackend::open(&args.store_dir)
        .await
        .context("opening verifier store")?;
    let secret = DeviceSecret::load_or_create(args.device_secret_path())
        .await
        .context("loading device secret")?;
    let store = VerifierStore::new(Arc::new(backend), secret, args.kdf_params())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = Arc::new(GestureVerifier::new(store, clock.clone(), args.kdf_params())?);

    match &args.command {
        Commands::Register {
            gesture,
            domain,
            panic,
        } => {
            let sequence = load_sequence(gesture).await?;
            let panic = match panic {
                Some(path) => Some(load_sequence(path).await?),
                None => None,
            };
            let registered = verifier
                .enroll(sequence, domain.clone(), panic)
                .await
                .context("registering gesture")?;
            print_json(&serde_json::json!({
                "registered": true,
                "domain": registered.domain,
                "panicGesture": registered.panic_hash.is_some(),
            }))?;
        }

        Commands::Knock { gesture } => {
            let sequence = load_sequence(gesture).await?;
            let config = match &args.config {
                Some(path) => DoormanConfig::load(path).await?,
                None => DoormanConfig::default(),
            };

            let mut doorman = Doorman::new(config, verifier.clone(), clock)?;
            if let Some(path) = &args.audit_log {
                let audit = AuditLogger::new(format!("speakeasy-{}", std::process::id()));
                audit
                    .init_file(path.clone())
                    .await
                    .with_context(|| format!("opening audit log {}", path.display()))?;
                doorman = doorman.with_audit_logger(audit);
            }

            let challenge = doorman.knock().await?;
            info!(expires_at = challenge.expires_at, "Challenge issued");

            let outcome = doorman.submit(sequence).await?;
            print_json(&outcome.observed())?;
            if !outcome.looks_admitted() {
                std::process::exit(2);
            }
        }

        Commands::Status => {
            let current = verifier.current_verifier().await?;
            print_json(&serde_json::json!({
                "registered": current.is_some(),
                "domain": current.as_ref().map(|v| v.domain.clone()),
                "panicGesture": current.as_ref().map(|v| v.panic_hash.is_some()),
            }))?;
        }

        Commands::Clear => {
            verifier.store().clear_verifier().await?;
            print_json(&serde_json::json!({ "registered": false }))?;
        }
    }

    Ok(())
}

async fn load_sequence(path: &std::path::Path) -> anyhow::Result<GestureSequence> {
    let capture = GestureCapture::load(path).await?;
    capture
        .replay()
        .with_context(|| format!("no gesture recognized in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
