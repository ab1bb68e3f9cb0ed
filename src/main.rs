use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ldap_directory_rs::api::{self, ApiState};
use ldap_directory_rs::auth::BearerToken;
use ldap_directory_rs::config::{Config, StorageBackend};
use ldap_directory_rs::context::ServerContext;
use ldap_directory_rs::db::DirectoryStore;
use ldap_directory_rs::dispatch::Dispatcher;
use ldap_directory_rs::ldap::LdapServer;
use ldap_directory_rs::memory_db::MemoryDirectoryStore;
use ldap_directory_rs::redis_db::RedisDirectoryStore;
use ldap_directory_rs::schema::{SchemaCatalog, SchemaHandle};
use ldap_directory_rs::tls;

/// Signal handler for graceful shutdown
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install Ctrl+C handler: {}", e))
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to install SIGTERM handler: {}", e)),
        }
    };

    #[cfg(not(unix))]
    let terminate = async { Ok::<(), anyhow::Error>(()) };

    tokio::select! {
        result = ctrl_c => result?,
        result = terminate => result?,
    }

    info!("Received shutdown signal, shutting down gracefully...");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DirectoryStore>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            let store = MemoryDirectoryStore::seeded(&config.seed_admin_password).await?;
            info!("Using in-memory directory store");
            Ok(Arc::new(store))
        }
        StorageBackend::Redis => {
            let store = RedisDirectoryStore::new(&config.redis_url(), None).await?;
            info!(
                "Connected to Redis at {}:{}",
                config.redis_host, config.redis_port
            );
            if store.seed_if_empty(&config.seed_admin_password).await? {
                info!("Provisioned empty Redis directory with seed data");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Log a listener task's failure; listeners only return on error.
fn supervise(name: &'static str, handle: JoinHandle<anyhow::Result<()>>) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => info!("{} stopped", name),
            Ok(Err(e)) => error!("{} failed: {:#}", name, e),
            Err(e) => error!("{} task panicked: {}", name, e),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting LDAP Directory RS");

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={:?}, TLS={}",
        config.storage_backend, config.enable_tls
    );
    config.validate()?;
    info!("Configuration validated successfully");

    let store = open_store(&config).await?;
    let schema = SchemaHandle::new(SchemaCatalog::load(store.as_ref()).await?);

    let context = Arc::new(
        ServerContext::new(store.clone(), schema.clone()).with_packet_logging(config.log_packets),
    );
    let server = LdapServer::new(context, Arc::new(Dispatcher::standard()));

    // API server
    let api_addr = config.api_address();
    let app = api::create_router(
        ApiState {
            store: store.clone(),
            schema,
        },
        BearerToken::new(config.api_bearer_token.clone()),
    );
    supervise(
        "API server",
        tokio::spawn(async move {
            info!("Starting API server on {}", api_addr);
            let listener = tokio::net::TcpListener::bind(&api_addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind API server on {}: {}", api_addr, e))?;
            axum::serve(listener, app)
                .await
                .map_err(|e| anyhow::anyhow!("API server error: {}", e))
        }),
    );

    // Plain LDAP
    let ldap_addr = config.ldap_address();
    let plain = server.clone();
    supervise(
        "LDAP server",
        tokio::spawn(async move {
            plain
                .run(&ldap_addr)
                .await
                .map_err(|e| anyhow::anyhow!("LDAP server error: {}", e))
        }),
    );

    // LDAPS
    if config.enable_tls {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
            let tls_config = tls::load_tls_config(cert_path, key_path)
                .map_err(|e| anyhow::anyhow!("Failed to load TLS config for LDAPS: {}", e))?;
            let ldaps_addr = config.ldaps_address();
            supervise(
                "LDAPS server",
                tokio::spawn(async move {
                    server
                        .run_with_tls(&ldaps_addr, tls_config)
                        .await
                        .map_err(|e| anyhow::anyhow!("LDAPS server error: {}", e))
                }),
            );
        } else {
            return Err(anyhow::anyhow!(
                "TLS enabled but certificate paths not provided"
            ));
        }
    }

    info!("All services started successfully");

    shutdown_signal().await?;

    info!("Shutdown complete");
    Ok(())
}
