use anyhow::{Context, Result};
use arena_server::api::Api;
use arena_server::config::{ProcessorConfig, ServerConfig, VerifierConfig};
use arena_server::processor::RetryPolicy;
use arena_server::store::LockConfig;
use arena_server::Service;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the JSON store document.
    #[arg(long, default_value = "data/store.json")]
    store_path: PathBuf,

    /// Path to the append-only audit log.
    #[arg(long, default_value = "data/audit.log")]
    audit_log_path: PathBuf,

    /// Path to the tournament definitions file (seeding disabled when omitted).
    #[arg(long)]
    tournaments: Option<PathBuf>,

    /// Age in milliseconds after which a held store lock is considered
    /// abandoned and force-released (0 uses default).
    #[arg(long)]
    lock_staleness_ms: Option<u64>,

    /// Store lock acquisition attempts before giving up (0 uses default).
    #[arg(long)]
    lock_retry_attempts: Option<u32>,

    /// Base delay in milliseconds for linear lock retry backoff (0 uses default).
    #[arg(long)]
    lock_retry_base_ms: Option<u64>,

    /// Base URL of the payment processor API.
    #[arg(long)]
    processor_url: Option<String>,

    /// Payment processor retry attempts for transient failures (0 uses default).
    #[arg(long)]
    processor_retry_attempts: Option<u32>,

    /// Base URL of the identity verifier API.
    #[arg(long)]
    verifier_url: Option<String>,

    /// Treasury wallet recorded as the payment recipient.
    #[arg(long)]
    recipient_address: Option<String>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("APP_ID")?;

    Ok(())
}

fn optional_env(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();

    let mut lock = LockConfig::default();
    if let Some(ms) = args.lock_staleness_ms.filter(|ms| *ms > 0) {
        lock.staleness = Duration::from_millis(ms);
    }
    if let Some(attempts) = args.lock_retry_attempts.filter(|a| *a > 0) {
        lock.max_attempts = attempts;
    }
    if let Some(ms) = args.lock_retry_base_ms.filter(|ms| *ms > 0) {
        lock.retry_base = Duration::from_millis(ms);
    }

    let mut retry = RetryPolicy::default();
    if let Some(attempts) = args.processor_retry_attempts.filter(|a| *a > 0) {
        retry.max_attempts = attempts;
    }

    let app_id = optional_env("APP_ID").unwrap_or_default();
    if is_production() && app_id.is_empty() {
        anyhow::bail!("APP_ID must be set in production");
    }

    Ok(ServerConfig {
        store_path: args.store_path.clone(),
        audit_log_path: args.audit_log_path.clone(),
        lock,
        recipient_address: args
            .recipient_address
            .clone()
            .or_else(|| optional_env("RECIPIENT_ADDRESS")),
        processor: ProcessorConfig {
            base_url: args
                .processor_url
                .clone()
                .unwrap_or(defaults.processor.base_url),
            app_id: app_id.clone(),
            api_key: optional_env("PROCESSOR_API_KEY"),
            retry,
        },
        verifier: VerifierConfig {
            base_url: args
                .verifier_url
                .clone()
                .unwrap_or(defaults.verifier.base_url),
            app_id,
        },
        tournaments_path: args.tournaments.clone(),
        http_body_limit_bytes: match args.http_body_limit_bytes {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => defaults.http_body_limit_bytes,
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing();
    ensure_production_env()?;

    let config = build_config(&args)?;
    let service = Arc::new(
        Service::new(config)
            .await
            .context("failed to initialize service")?,
    );
    let api = Api::new(service);
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .context("axum server error")?;

    Ok(())
}
