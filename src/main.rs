use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use slotd::engine::Engine;
use slotd::monitor::MonitorRegistry;
use slotd::observability;
use slotd::processor::Processor;
use slotd::server::{Policy, Server, ServerConfig};

/// Facilities present at startup. Everything else about the service is
/// in-memory and forgotten on restart.
const SEED_FACILITIES: [&str; 2] = ["RoomA", "RoomB"];

#[derive(Parser)]
#[command(name = "slotd", about = "UDP facility-booking server with configurable invocation semantics")]
struct Args {
    #[arg(long, default_value_t = 9876)]
    port: u16,

    /// AT_MOST_ONCE or AT_LEAST_ONCE.
    #[arg(long, default_value = "AT_MOST_ONCE")]
    semantic: String,

    /// Probability of dropping an incoming datagram.
    #[arg(long = "lossRate", default_value_t = 0.0)]
    loss_rate: f64,

    /// Probability of dropping a reply or callback datagram.
    #[arg(long = "replyLossRate", default_value_t = 0.0)]
    reply_loss_rate: f64,

    /// Synthetic delay before each outbound datagram.
    #[arg(long = "delayMs", default_value_t = 0)]
    delay_ms: i64,

    /// TTL of duplicate-reply cache entries.
    #[arg(long = "cacheTtlSeconds", default_value_t = 300)]
    cache_ttl_seconds: u32,

    /// Expose Prometheus metrics on this port.
    #[arg(long = "metricsPort")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    observability::init(args.metrics_port);

    let config = ServerConfig {
        port: args.port,
        policy: Policy::from_flag(&args.semantic),
        loss_rate: args.loss_rate,
        reply_loss_rate: args.reply_loss_rate,
        delay: Duration::from_millis(args.delay_ms.max(0) as u64),
        cache_ttl: Duration::from_secs(args.cache_ttl_seconds as u64),
    };

    let engine = Arc::new(Engine::new());
    for name in SEED_FACILITIES {
        engine.ensure_facility(name).await;
    }
    let monitors = Arc::new(MonitorRegistry::new());
    let server = Server::bind(&config, Processor::new(engine, monitors)).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping server");
        }
    }
    Ok(())
}
