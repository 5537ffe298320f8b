use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use mchat::client::{PushEvent, RpcClient};
use mchat::config::{Settings, load_config};
use mchat::connection::ConnectionManager;
use mchat::persistence::{MemoryDirectory, SessionStore};
use mchat::server::{Dispatcher, Gateway, Services};
use mchat::transport::{Connector, LocalConnector, MqttConnector};
use mchat::utils::logging;

const GATEWAY_CLIENT_ID: &str = "mchat-gateway";

#[derive(Debug, Parser)]
#[command(name = "mchat", version, about = "RPC over MQTT messaging gateway and client")]
struct Cli {
    /// Run against an in-process broker with an embedded gateway.
    #[arg(long, global = true)]
    in_process: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve requests until Ctrl-C.
    Server,
    /// Connect, bind, perform one request and print the reply envelope.
    Call {
        action: String,
        /// Request parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Account to bind as. Overrides `client.account_id`.
        #[arg(long)]
        account: Option<String>,
    },
    /// Print push events until Ctrl-C.
    Listen {
        #[arg(long)]
        account: Option<String>,
        /// Also receive messages of these groups.
        #[arg(long = "group")]
        groups: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = load_config().context("failed to load configuration")?;
    logging::init(&settings.log.level);

    let connector: Arc<dyn Connector> = if cli.in_process {
        Arc::new(LocalConnector::default())
    } else {
        Arc::new(MqttConnector::new())
    };

    match cli.command {
        Command::Server => serve(&settings, connector).await,
        Command::Call {
            action,
            params,
            account,
        } => {
            let embedded = embedded_gateway(cli.in_process, &settings, &connector).await?;
            let result = call(&settings, connector, account, &action, &params).await;
            if let Some(stop) = embedded {
                let _ = stop.send(());
            }
            result
        }
        Command::Listen { account, groups } => {
            let _embedded = embedded_gateway(cli.in_process, &settings, &connector).await?;
            listen(&settings, connector, account, &groups).await
        }
    }
}

fn gateway(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    sessions: SessionStore,
) -> anyhow::Result<Gateway> {
    let mut options = settings.connect_options(GATEWAY_CLIENT_ID);
    options.clean_session = false;
    let conn = ConnectionManager::new(connector, options, settings.backoff());

    let directory = match &settings.directory.seed_path {
        Some(path) => MemoryDirectory::load(path)
            .with_context(|| format!("failed to load directory seed {path}"))?,
        None => MemoryDirectory::new(),
    };

    let topics = settings.topic_scheme();
    let services = Services {
        sessions: Arc::new(sessions),
        directory: Arc::new(directory),
        publisher: Arc::new(conn.clone()),
        topics: topics.clone(),
    };
    Ok(Gateway::new(
        conn,
        Dispatcher::new(services),
        topics,
        settings.broker.share_group.clone(),
    ))
}

async fn serve(settings: &Settings, connector: Arc<dyn Connector>) -> anyhow::Result<()> {
    let sessions = SessionStore::open(&settings.session.path)
        .with_context(|| format!("failed to open session store at {}", settings.session.path))?;
    let gateway = gateway(settings, connector, sessions)?;
    info!(filter = %gateway.request_filter(), "starting gateway");
    gateway
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

/// With `--in-process` there is no external gateway, so run one on the
/// shared in-process broker for the lifetime of the command. Its bindings
/// are kept in a temporary store that is gone when the process exits.
async fn embedded_gateway(
    in_process: bool,
    settings: &Settings,
    connector: &Arc<dyn Connector>,
) -> anyhow::Result<Option<tokio::sync::oneshot::Sender<()>>> {
    if !in_process {
        return Ok(None);
    }
    let sessions = SessionStore::temporary().context("failed to open temporary session store")?;
    let mut gateway = gateway(settings, connector.clone(), sessions)?;
    gateway.start().await?;
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(gateway.serve(async {
        let _ = stopped.await;
    }));
    Ok(Some(stop))
}

fn client_settings(settings: &Settings, account: Option<String>) -> anyhow::Result<Settings> {
    let mut settings = settings.clone();
    if let Some(account) = account {
        settings.client.account_id = account;
    }
    if settings.client.account_id.is_empty() {
        bail!("an account is required: pass --account or set client.account_id");
    }
    Ok(settings)
}

async fn call(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    account: Option<String>,
    action: &str,
    params: &str,
) -> anyhow::Result<()> {
    let settings = client_settings(settings, account)?;
    let params: Map<String, Value> =
        serde_json::from_str(params).context("--params must be a JSON object")?;

    let client = RpcClient::from_settings(&settings, connector);
    if let Err(e) = client.connect().await {
        client.disconnect().await;
        return Err(e).context("failed to connect");
    }
    let outcome = client.request(action, params).await;
    client.disconnect().await;

    let reply = outcome.with_context(|| format!("{action} failed"))?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn listen(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    account: Option<String>,
    groups: &[String],
) -> anyhow::Result<()> {
    let settings = client_settings(settings, account)?;
    let client = RpcClient::from_settings(&settings, connector);
    let mut events = client.events();
    for group in groups {
        client.subscribe_group(group).await?;
    }
    if let Err(e) = client.connect().await {
        warn!(error = %e, "not connected yet, retrying in the background");
    }
    info!(account = %client.account_id(), "listening for pushes");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(PushEvent::Inbox(msg)) => println!("inbox {}", serde_json::to_string(&msg)?),
                Ok(PushEvent::Group(msg)) => println!("group {}", serde_json::to_string(&msg)?),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "push consumer lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}
