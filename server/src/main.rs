use anyhow::{Context, Result};
use clap::Parser;
use giftwheel_server::{AcceptAll, Api, Service, ServerConfig, SqliteStore};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "giftwheel-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("giftwheel-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    /// Path to the SQLite database (created if missing).
    #[arg(long)]
    database_path: Option<PathBuf>,
    /// Countdown between the second participant joining and the spin (0 uses default).
    #[arg(long)]
    countdown_ms: Option<u64>,
    /// Settle spinning rounds on read once they have spun this long (0 disables).
    #[arg(long)]
    auto_resolve_ms: Option<u64>,
    /// Distinct participants per round (0 uses default).
    #[arg(long)]
    max_participants: Option<usize>,
    /// Seed for the draw RNG (entropy when omitted).
    #[arg(long)]
    deterministic_seed: Option<u64>,
    /// Skip seeding the demo gift catalog.
    #[arg(long, default_value_t = false)]
    no_seed: bool,
    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,
    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,
    /// Bet endpoint rate limit per IP in requests per minute (0 disables).
    #[arg(long)]
    bet_rate_limit_per_minute: Option<u64>,
    /// Bet endpoint rate limit burst size (0 disables).
    #[arg(long)]
    bet_rate_limit_burst: Option<u32>,
    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
    /// How long a writer waits on a locked database (0 uses default).
    #[arg(long)]
    sqlite_busy_timeout_ms: Option<u64>,
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

/// Maps an optional arg value keeping default on 0: 0 => default, Some(v) => v, None => default
fn map_default_on_zero<T: Copy + PartialEq + From<u8>>(arg: Option<T>, default: T) -> T {
    match arg {
        Some(v) if v != T::from(0) => v,
        _ => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let max_participants = match args.max_participants {
        Some(0) | None => defaults.max_participants,
        Some(value) => value,
    };
    if max_participants < defaults.min_participants {
        anyhow::bail!(
            "max_participants must be at least {}",
            defaults.min_participants
        );
    }

    Ok(ServerConfig {
        database_path: args
            .database_path
            .clone()
            .unwrap_or(defaults.database_path),
        countdown_ms: map_default_on_zero(args.countdown_ms, defaults.countdown_ms),
        min_participants: defaults.min_participants,
        max_participants,
        auto_resolve_ms: map_optional_limit(args.auto_resolve_ms, defaults.auto_resolve_ms),
        settle_attempts: defaults.settle_attempts,
        deterministic_seed: args.deterministic_seed.or(defaults.deterministic_seed),
        seed_catalog: !args.no_seed,
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        bet_rate_limit_per_minute: map_optional_limit(
            args.bet_rate_limit_per_minute,
            defaults.bet_rate_limit_per_minute,
        ),
        bet_rate_limit_burst: map_optional_limit(
            args.bet_rate_limit_burst,
            defaults.bet_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        sqlite_busy_timeout_ms: map_default_on_zero(
            args.sqlite_busy_timeout_ms,
            defaults.sqlite_busy_timeout_ms,
        ),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = build_config(&args)?;
    let store = SqliteStore::open(
        &config.database_path,
        Duration::from_millis(config.sqlite_busy_timeout_ms),
    )?;
    info!(
        path = %config.database_path.display(),
        countdown_ms = config.countdown_ms,
        max_participants = config.max_participants,
        auto_resolve_ms = ?config.auto_resolve_ms,
        "database opened"
    );

    let service = Service::new(config, store, Arc::new(AcceptAll))?;
    let api = Api::new(Arc::new(service));
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
