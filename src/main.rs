//! iap-tunnel - Forward a local TCP port to an instance port through the tunnel relay
//!
//! Listens on a local address, opens an authenticated WebSocket to the relay and
//! bridges the first local client over it.

use anyhow::{Context, Result};
use clap::Parser;
use iap_relay::config::DEFAULT_BUFFER_SIZE;
use iap_relay::{LocalListener, RelayConfig, RelayLoop, ShutdownReason};
use iap_transport::config::{DEFAULT_ENDPOINT, DEFAULT_INTERFACE};
use iap_transport::{ConnectConfig, MessageTransport, WebSocketTransport};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long the relay gets to close both endpoints after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// iap-tunnel - Tunnel a local port to a remote instance through the relay
#[derive(Parser, Debug)]
#[command(name = "iap-tunnel")]
#[command(about = "Tunnel a local port to a remote instance through the relay")]
#[command(version)]
#[command(long_about = r#"
Listen on a local port and forward the first client that connects to a port
on a remote instance, over an authenticated WebSocket to the tunnel relay.

EXAMPLES:
  # Reach SSH on an instance through local port 2222
  iap-tunnel --project my-project --zone us-central1-a \
    --instance my-vm --port 22 --local-port 2222 \
    --token "$(gcloud auth print-access-token)"

ENVIRONMENT VARIABLES:
  PROJECT_ID        Project that owns the instance
  ZONE              Zone of the instance
  INSTANCE          Instance name
  INTERFACE         Network interface (default nic0)
  PORT              Port on the instance
  LOCAL_PORT        Local port to listen on (default 4000)
  LOCAL_BIND        Local address to bind (default 127.0.0.1)
  IAP_ACCESS_TOKEN  OAuth bearer token
  IAP_ENDPOINT      Relay endpoint override
"#)]
struct Cli {
    /// Project that owns the target instance
    #[arg(long, env = "PROJECT_ID")]
    project: String,

    /// Zone of the target instance
    #[arg(long, env = "ZONE")]
    zone: String,

    /// Target instance name
    #[arg(long, env = "INSTANCE")]
    instance: String,

    /// Network interface on the instance
    #[arg(long, env = "INTERFACE", default_value = DEFAULT_INTERFACE)]
    interface: String,

    /// Port on the instance to forward to
    #[arg(long, env = "PORT")]
    port: u16,

    /// Local port to listen on
    #[arg(long, env = "LOCAL_PORT", default_value_t = 4000)]
    local_port: u16,

    /// Local address to bind
    #[arg(long, env = "LOCAL_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    /// OAuth bearer token for the relay
    #[arg(long, env = "IAP_ACCESS_TOKEN", hide_env_values = true)]
    token: String,

    /// Relay endpoint
    #[arg(long, env = "IAP_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bytes read from the local client per data frame
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            endpoint: self.endpoint.clone(),
            project: self.project.clone(),
            zone: self.zone.clone(),
            instance: self.instance.clone(),
            interface: self.interface.clone(),
            port: self.port,
            access_token: self.token.clone(),
            ..Default::default()
        }
    }

    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            buffer_size: self.buffer_size,
            ..Default::default()
        }
    }

    fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.local_port)
    }
}

/// Setup logging; `RUST_LOG` takes precedence over the verbosity flag
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Connect to the relay and bridge the first local client
///
/// Returns early without error once `shutdown` is cancelled.
async fn run_tunnel(
    listener: LocalListener,
    connect: ConnectConfig,
    relay_config: RelayConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let transport = tokio::select! {
        result = WebSocketTransport::connect(&connect) => {
            result.context("Failed to connect to relay")?
        }
        _ = shutdown.cancelled() => return Ok(()),
    };
    info!(conn_id = %transport.connection_id(), "Relay connection established");

    let (stream, peer) = tokio::select! {
        result = listener.accept_one() => result.context("Failed to accept local client")?,
        _ = shutdown.cancelled() => return Ok(()),
    };
    info!("Local client connected from {}", peer);

    let relay = RelayLoop::new(relay_config, stream, transport)
        .context("Invalid relay config")?
        .with_shutdown(shutdown);
    let report = relay.run().await.context("Relay loop failed")?;

    match report.reason {
        ShutdownReason::LocalConnectionClosed => info!("Local client disconnected"),
        ShutdownReason::TransportClosed => warn!("Relay closed the connection"),
        ShutdownReason::ShutdownRequested => info!("Tunnel shut down"),
    }
    info!(
        sid = %report.sid,
        sent = report.stats.bytes_sent_to_transport,
        received = report.stats.bytes_received_from_transport,
        unacked = report.stats.unacked_by_peer(),
        reconnects = report.reconnect_acks,
        "Tunnel closed"
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let connect = cli.connect_config();
    connect.validate().context("Invalid connection settings")?;
    let relay_config = cli.relay_config();
    relay_config.validate().context("Invalid relay settings")?;

    info!(
        project = %connect.project,
        zone = %connect.zone,
        instance = %connect.instance,
        interface = %connect.interface,
        port = connect.port,
        "iap-tunnel starting"
    );

    let listener = LocalListener::bind(cli.local_addr())
        .await
        .with_context(|| format!("Failed to bind {}", cli.local_addr()))?;

    let shutdown = CancellationToken::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut tunnel_task = tokio::spawn(run_tunnel(
        listener,
        connect,
        relay_config,
        shutdown.clone(),
    ));

    let result = tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
            shutdown.cancel();

            match tokio::time::timeout(SHUTDOWN_GRACE, &mut tunnel_task).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Tunnel did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                    tunnel_task.abort();
                    Ok(Ok(()))
                }
            }
        }
        result = &mut tunnel_task => result,
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Tunnel error: {:#}", e);
            return Err(e);
        }
        Err(e) => {
            error!("Tunnel task panicked: {}", e);
            return Err(e.into());
        }
    }

    info!("iap-tunnel stopped");
    Ok(())
}
