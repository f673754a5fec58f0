use clap::{Parser, ValueEnum};
use questbank_core::LedgerStorageConfig;
use questbank_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "questbankd", version, about = "QuestBank coin economy REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8094
    #[arg(long, default_value = "127.0.0.1:8094")]
    listen: SocketAddr,
    /// User id registered as the first master admin.
    #[arg(long, default_value = "platform-root", env = "QUESTBANK_BOOTSTRAP_ADMIN")]
    bootstrap_admin: String,
    /// Coins credited to the platform wallet at first start.
    #[arg(long, default_value_t = 0, env = "QUESTBANK_INITIAL_PLATFORM_COINS")]
    initial_platform_coins: u64,
    /// Ledger persistence backend. `auto` picks postgres when database url is configured.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Auto, env = "QUESTBANK_LEDGER_STORAGE")]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for coin ledger persistence.
    #[arg(long, env = "QUESTBANK_LEDGER_DATABASE_URL")]
    ledger_database_url: Option<String>,
    /// Max PostgreSQL pool connections for ledger persistence.
    #[arg(long, default_value_t = 5, env = "QUESTBANK_LEDGER_PG_MAX_CONNECTIONS")]
    ledger_pg_max_connections: u32,
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    let resolved_url = cli
        .ledger_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.ledger_storage {
        LedgerStorageMode::Memory => LedgerStorageConfig::Memory,
        LedgerStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "ledger_storage=postgres requires --ledger-database-url or DATABASE_URL"
                )
            })?;
            LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
        }
        LedgerStorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
            } else {
                LedgerStorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "questbank_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let ledger_storage = resolve_ledger_storage(&cli)?;
    let config = ServiceConfig {
        bootstrap_admin: cli.bootstrap_admin,
        initial_platform_coins: cli.initial_platform_coins,
        ledger_storage,
    };
    let state = ServiceState::bootstrap(config).await?;
    info!(
        ledger_backend = state.engine.ledger_backend(),
        "questbank engine bootstrapped"
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("questbank-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
