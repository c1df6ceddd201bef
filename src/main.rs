//! Discovery - region-wide service registry

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery::{
    config::{Args, CoordinationBackend},
    coordination::{CoordinationClient, EtcdStore, MemoryStore},
    transport::{MessagingTransport, NatsClient},
    Registry, RpcServer, Supervisor,
};

/// Exit code when the registry cannot start
const EXIT_STARTUP: i32 = 3;

/// Exit code when a background loop fails
const EXIT_FATAL: i32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("discovery={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(EXIT_FATAL);
    }

    let config = args.registry_config();
    info!("======================================");
    info!("  Discovery - service registry");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("Coordination: {:?} (root {})", args.coordination, config.root_path);
    info!(
        "Heartbeat: every {:?}, evict after {:?}",
        config.heartbeat_interval, config.max_silence
    );
    info!("Topic prefix: {}", config.topic_prefix);
    info!("======================================");

    let nats = match NatsClient::new(&args.nats, "discovery").await {
        Ok(client) => {
            info!(name = client.name(), "NATS connected successfully");
            client
        }
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(EXIT_STARTUP);
        }
    };
    let transport: Arc<dyn MessagingTransport> = Arc::new(nats.clone());

    let supervisor = Supervisor::new();
    let mut etcd = None;
    let store: Arc<dyn CoordinationClient> = match args.coordination {
        CoordinationBackend::Etcd => {
            let endpoints = args.etcd_endpoint_list();
            let ttl = Duration::from_secs(args.session_ttl_secs);
            match EtcdStore::connect(&endpoints, ttl).await {
                Ok(client) => {
                    info!("etcd connected (lease {})", client.lease_id());
                    supervisor.spawn(
                        "etcd-session",
                        client
                            .clone()
                            .keep_alive(supervisor.shutdown_signal(), supervisor.fatal_signal()),
                    );
                    let client = Arc::new(client);
                    etcd = Some(Arc::clone(&client));
                    client
                }
                Err(e) => {
                    error!("etcd connection failed: {}", e);
                    std::process::exit(EXIT_STARTUP);
                }
            }
        }
        CoordinationBackend::Memory => {
            warn!("Using in-memory coordination store (dev mode, not shared across processes)");
            Arc::new(MemoryStore::new())
        }
    };

    let started = Registry::start(config.clone(), store, Arc::clone(&transport), &supervisor).await;
    let registry = match started {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to start registry: {}", e);
            std::process::exit(EXIT_STARTUP);
        }
    };

    let server = Arc::new(RpcServer::new(registry, transport, config.topic_prefix.clone()));
    if let Err(e) = server.start(&supervisor).await {
        error!("Failed to start RPC server: {}", e);
        std::process::exit(EXIT_STARTUP);
    }

    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            0
        }
        fatal = supervisor.wait_fatal() => {
            match fatal {
                Some(fatal) => error!("Fatal error, shutting down: {}", fatal),
                None => error!("Fatal channel closed, shutting down"),
            }
            EXIT_FATAL
        }
    };

    supervisor.shutdown().await;
    if let Err(e) = nats.flush().await {
        warn!("Failed to flush NATS: {}", e);
    }
    // revoking the lease removes our ephemeral nodes right away
    if let Some(etcd) = etcd {
        if let Err(e) = etcd.close().await {
            warn!("Failed to revoke etcd lease: {}", e);
        }
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    info!("Discovery stopped");
    Ok(())
}
