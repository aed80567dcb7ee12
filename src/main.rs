use std::net::SocketAddr;
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};

use relayer::api::{self, ApiState};
use relayer::blockstore::{Blockstore, FileBlockstore, PgBlockstore};
use relayer::chain::RelayChain;
use relayer::config::{BlockstoreConfig, ChainConfig, Config};
use relayer::connection::Connection;
use relayer::db;
use relayer::evm::EvmConnection;
use relayer::manager::RelayManager;
use relayer::writer::WriterConfig;

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let config = Config::load()?;
    init_logging(config.json_logs);

    tracing::info!(
        chains = config.enabled_chains().count(),
        blockstore = ?config.blockstore,
        "Starting CL8Y bridge relayer"
    );

    let pool = match &config.blockstore {
        BlockstoreConfig::Postgres { url } => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database connected, migrations complete");
            Some(pool)
        }
        BlockstoreConfig::File { .. } => None,
    };

    let mut manager = RelayManager::new();
    for chain in config.enabled_chains() {
        let conn = Arc::new(EvmConnection::new(chain, &config.relayer.private_key)?);
        let blockstore = open_blockstore(&config.blockstore, pool.as_ref(), conn.as_ref())?;
        let relay = RelayChain::new(
            conn,
            blockstore,
            config.relayer.listener_config(chain),
            writer_config(&config, chain)?,
            manager.error_sender(),
        );
        manager.add_chain(Box::new(relay))?;
        tracing::info!(chain_id = chain.id, name = %chain.name, "Chain configured");
    }

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_state = ApiState::new(manager.chain_ids());
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let result = manager.run(wait_for_shutdown_signal()).await;
    match &result {
        Ok(()) => tracing::info!("CL8Y bridge relayer stopped"),
        Err(e) => tracing::error!(error = %e, "CL8Y bridge relayer stopped on fatal error"),
    }
    result
}

fn open_blockstore(
    config: &BlockstoreConfig,
    pool: Option<&sqlx::PgPool>,
    conn: &EvmConnection,
) -> Result<Arc<dyn Blockstore>> {
    let relayer = conn.relayer_address();
    match config {
        BlockstoreConfig::File { path } => Ok(Arc::new(FileBlockstore::new(
            path,
            conn.chain_id(),
            &relayer,
        ))),
        BlockstoreConfig::Postgres { .. } => {
            let pool = pool.ok_or_else(|| eyre!("Postgres blockstore selected without a pool"))?;
            Ok(Arc::new(PgBlockstore::new(pool.clone(), conn.chain_id(), &relayer)))
        }
    }
}

fn writer_config(config: &Config, chain: &ChainConfig) -> Result<WriterConfig> {
    let handler = hex::decode(chain.erc20_handler.trim_start_matches("0x"))
        .wrap_err_with(|| format!("Invalid ERC20 handler address for chain {}", chain.name))?;
    Ok(WriterConfig {
        retry: config.relayer.tx_retry(),
        queue_capacity: config.relayer.queue_capacity,
        ..WriterConfig::new(handler)
    })
}

/// Initialize tracing/logging with structured output
fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relayer=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
