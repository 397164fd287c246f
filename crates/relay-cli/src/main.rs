mod config;
mod config_watcher;
mod metrics;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::RelayConfig;
use config_watcher::ConfigWatcher;
use relay_automation::WorkbenchFactory;
use relay_bus::{BusServer, Connector, LocalConnector, Switchboard, WsConnector};
use relay_core::{Envelope, Identity, Invocation, Message, TaskItem, Target};
use relay_decision::HttpDecision;
use relay_orchestrator::{
    DiscordReporter, HttpDecisionFactory, Hub, HubParts, StatusReporter, TaskLauncher,
    TracingReporter,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "relay", about = "Relay: hub, coordinator and executor orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Hub host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Hub port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub and serve the bus
    Serve,
    /// Send an objective for the hub to plan
    Submit {
        /// Free-text objective
        objective: String,
    },
    /// Push a raw item onto the global queue
    Enqueue {
        /// Item as JSON; anything that is not valid JSON is sent as a string
        item: String,
    },
    /// Ask the hub to attach a coordinator
    Attach {
        /// Treat items as ready-made action lists instead of asking the model
        #[arg(long)]
        no_decision: bool,
        /// Decision endpoint for this coordinator
        #[arg(long)]
        endpoint: Option<String>,
        /// Stable coordinator id
        #[arg(long)]
        id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let found = cli.config.exists();
    let mut config = if found {
        RelayConfig::load(&cli.config)?
    } else {
        RelayConfig::default()
    };
    if let Some(host) = cli.host.clone() {
        config.hub.host = host;
    }
    if let Some(port) = cli.port {
        config.hub.port = port;
    }

    init_tracing(config.debug, cli.json);
    if !found {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Commands::Serve => serve(config, cli.config, found).await,
        Commands::Submit { objective } => {
            send_once(&config, Target::AnyHub, Message::NewInstruction { objective }).await
        }
        Commands::Enqueue { item } => {
            let payload = serde_json::from_str(&item).unwrap_or(serde_json::Value::String(item));
            let item = TaskItem::new(payload);
            send_once(&config, Target::AnyHub, Message::NodeAddQueueItem { item }).await
        }
        Commands::Attach {
            no_decision,
            endpoint,
            id,
        } => {
            let call = Invocation::AttachCoordinator {
                uses_decision_collaborator: !no_decision,
                endpoint,
                id,
            };
            send_once(&config, Target::AnyHub, Message::FunctionInvoke(call)).await
        }
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn reporter(config: &RelayConfig) -> Arc<dyn StatusReporter> {
    match config.status.discord() {
        Some((token, channel)) => {
            info!(channel, "Reporting status to Discord");
            Arc::new(DiscordReporter::new(token, channel))
        }
        None => Arc::new(TracingReporter),
    }
}

async fn serve(config: RelayConfig, config_path: PathBuf, watch: bool) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.hub.host, config.hub.port)
        .parse()
        .with_context(|| format!("invalid hub address {}:{}", config.hub.host, config.hub.port))?;
    metrics::record(&config.metrics_path);

    let (switchboard, hub_connection) = Switchboard::new(Identity::hub(config.hub.name.clone()));
    let (hub_tx, hub_rx) = hub_connection.split();
    let connector: Arc<dyn Connector> = Arc::new(LocalConnector::new(Arc::clone(&switchboard)));
    let reporter = reporter(&config);

    let launcher = TaskLauncher {
        connector: Arc::clone(&connector),
        decisions: Arc::new(HttpDecisionFactory::new(config.decision.clone())),
        automation: Arc::new(WorkbenchFactory::new(config.automation())),
        coordinator: config.coordinator.clone(),
        executor: config.executor.clone(),
        debug: config.debug,
        reporter: Arc::clone(&reporter),
    };
    let mut hub = Hub::new(
        config.hub.clone(),
        config.debug,
        HubParts {
            sender: hub_tx,
            launcher: Arc::new(launcher),
            planner: Arc::new(HttpDecision::new(config.decision.clone())),
            reporter,
        },
    );

    let origin = hub.name().to_string();
    for _ in 0..config.hub.attach_on_start {
        hub.handle(Envelope::new(
            origin.clone(),
            Target::AnyHub,
            Message::FunctionInvoke(Invocation::AttachCoordinator {
                uses_decision_collaborator: true,
                endpoint: None,
                id: None,
            }),
        ));
    }

    let _watcher = if watch {
        let (reload_tx, mut reload_rx) = connector
            .connect(Identity::external("relay-config"))
            .await?
            .split();
        // Flooded traffic still reaches this connection; discard it.
        tokio::spawn(async move { while reload_rx.recv().await.is_some() {} });
        let started = ConfigWatcher::start(config_path, Duration::from_millis(500), move |fresh| {
            let update = fresh.reloadable();
            info!(debug = ?update.debug, pull_timeout_ms = ?update.pull_timeout_ms, "Config changed, broadcasting");
            let envelope = Envelope::new("relay-config", Target::Any, Message::UpdateConfig(update));
            if let Err(e) = reload_tx.send(envelope) {
                warn!(error = %e, "Config broadcast failed");
            }
        });
        match started {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Config hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    tokio::spawn(async move {
        if let Err(e) = hub.run(hub_rx).await {
            tracing::error!(error = %e, "Hub stopped");
        }
    });

    info!(%addr, hub = %switchboard.hub(), "Relay hub starting");
    BusServer::serve(addr, switchboard).await?;
    Ok(())
}

/// Connect as a one-off participant, send one envelope and wait for the hub
/// to close the connection.
async fn send_once(config: &RelayConfig, target: Target, message: Message) -> anyhow::Result<()> {
    let url = format!("ws://{}:{}/ws", config.hub.host, config.hub.port);
    let name = format!("relay-cli-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let (sender, mut receiver) = WsConnector::new(url)
        .connect(Identity::external(name.clone()))
        .await?
        .split();

    let kind = message.kind();
    sender.send(Envelope::new(name, target, message))?;
    drop(sender);

    // The writer closes the socket once everything queued has been sent.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while receiver.recv().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(kind, "Hub did not close the connection in time");
    }
    println!("sent {kind}");
    Ok(())
}
