//! # Inbox relay
//!
//! Webhook relay and dashboard backend for WhatsApp and Messenger.
//!
//! - **Webhooks**: verifies Meta's subscription handshake and stores inbound
//!   messages as conversations
//! - **Realtime**: SSE streams and long-polling per conversation, fed by a
//!   Postgres `LISTEN/NOTIFY` change feed (or an in-process bus when no
//!   database is configured)
//! - **Replies**: outbound messages through the Graph API

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use relay_config::{Config, ConfigLoad, ConfigLoader};
use relay_core::{
    ConversationStore, FanoutService, FanoutSettings, GraphApiSender,
    GraphApiSettings, InMemoryConversationStore, OutboundSender,
    PgChangeSource, PostgresConversationStore, fanout::BackoffPolicy,
};
use relay_server::{
    AppState, create_app, db,
    infra::{
        app_context::AppContext,
        startup::{ProdStartupHooks, StartupHooks},
    },
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(
    about = "WhatsApp and Messenger webhook relay with realtime dashboard updates"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ServeArgs {
    /// Path to relay.toml (overrides RELAY_CONFIG_PATH discovery)
    #[arg(short, long, env = "RELAY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        match command {
            Command::Db(DbCommand::Migrate) => {
                run_db_migrate(&cli.serve).await?;
                return Ok(());
            }
        }
    }

    run_server(cli.serve).await
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let ConfigBootstrap { config } = load_runtime_config(args)?;
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is required to run migrations")?;
    let pool = db::connect_pool(url, config.database.max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

struct ConfigBootstrap {
    config: Arc<Config>,
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<ConfigBootstrap> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::new().with_config_path(path),
        None => ConfigLoader::new(),
    };
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    apply_cli_overrides(&mut config, args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    Ok(ConfigBootstrap {
        config: Arc::new(config),
    })
}

fn apply_cli_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
}

fn fanout_settings(config: &Config) -> FanoutSettings {
    let fanout = &config.fanout;
    FanoutSettings {
        heartbeat_interval: fanout.heartbeat_interval,
        poll_ceiling: fanout.poll_ceiling,
        backoff: BackoffPolicy {
            base: fanout.backoff_base,
            max: fanout.backoff_max,
            jitter_ratio: fanout.jitter_ratio,
        },
    }
}

fn graph_api_settings(config: &Config) -> GraphApiSettings {
    GraphApiSettings {
        base_url: config.meta.graph_base_url.clone(),
        whatsapp_token: config.meta.whatsapp_token.clone(),
        page_token: config.meta.page_token.clone(),
        ..GraphApiSettings::default()
    }
}

struct ResourceBootstrap {
    context: Arc<AppContext>,
    state: AppState,
}

async fn wire_app_resources(
    config: Arc<Config>,
) -> anyhow::Result<ResourceBootstrap> {
    let settings = fanout_settings(&config);

    let (store, fanout): (Arc<dyn ConversationStore>, FanoutService) =
        match config.database.url.as_deref() {
            Some(url) => {
                let pool =
                    db::connect_pool(url, config.database.max_connections)
                        .await?;
                db::run_migrations(&pool).await?;

                let store: Arc<dyn ConversationStore> =
                    Arc::new(PostgresConversationStore::new(pool.clone()));
                let source = Arc::new(PgChangeSource::new(
                    pool,
                    config.fanout.notify_channel.clone(),
                ));
                let fanout = FanoutService::with_change_feed(
                    Arc::clone(&store),
                    source,
                    settings,
                );
                (store, fanout)
            }
            None => {
                warn!(
                    "DATABASE_URL not set; using the in-memory store. Conversations are lost on restart and updates stay within this process"
                );
                let store: Arc<dyn ConversationStore> =
                    Arc::new(InMemoryConversationStore::new());
                let fanout =
                    FanoutService::single_process(Arc::clone(&store), settings);
                (store, fanout)
            }
        };

    let outbound: Arc<dyn OutboundSender> = Arc::new(
        GraphApiSender::new(graph_api_settings(&config))
            .context("failed to build Graph API client")?,
    );

    let context = Arc::new(AppContext::new(config, store, fanout, outbound));
    let state = AppState::new(Arc::clone(&context));
    Ok(ResourceBootstrap { context, state })
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    run_server_with_hooks(args, &ProdStartupHooks).await
}

async fn run_server_with_hooks<H>(
    args: ServeArgs,
    hooks: &H,
) -> anyhow::Result<()>
where
    H: StartupHooks,
{
    let ConfigBootstrap { config } = load_runtime_config(&args)?;
    let ResourceBootstrap { context, state } =
        wire_app_resources(Arc::clone(&config)).await?;

    hooks.run(Arc::clone(&context), &state).await?;

    let addr: SocketAddr =
        format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    config.server.host, config.server.port
                )
            })?;

    let router = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "Starting inbox relay on {}:{}",
        config.server.host, config.server.port
    );

    let shutdown_context = Arc::clone(&context);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received; closing realtime subscriptions");
            shutdown_context.fanout().shutdown().await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
