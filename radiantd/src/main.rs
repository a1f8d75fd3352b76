//! radiantd: hosts one simulation and serves it over JSON lines on TCP.

mod paths;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use radiant::protocol::{Request, Response, DEFAULT_ADDR};
use radiant::{NodeOverrides, Simulation, SimulationConfig};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use paths::AppPaths;

/// Lower bound for `Watch` frames so a client cannot spin the daemon.
const MIN_WATCH_MS: u64 = 20;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: invalid config: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

struct Daemon {
    sim: Simulation,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    fn new(config: SimulationConfig) -> Result<Self, radiant::SimError> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            sim: Simulation::new(config)?,
            shutdown,
        })
    }

    /// Answer every request except `Watch`, which needs the connection.
    fn dispatch(&self, request: Request) -> Response {
        let sim = &self.sim;
        let result = match request {
            Request::CreateNode { kind, overrides } => NodeOverrides::from_json(overrides)
                .and_then(|o| sim.create_node(&kind, o))
                .map(|id| Response::Created { id }),
            Request::GetNode { id } => sim.get_node_snapshot(id).map(Response::Node),
            Request::ListNodes => sim
                .list_node_snapshots()
                .map(|nodes| Response::Nodes { nodes }),
            Request::GetHistory { id } => sim
                .get_history(id)
                .map(|entries| Response::History { id, entries }),
            Request::GetStatus => sim.get_status().map(Response::Status),
            Request::Shutdown => {
                self.shutdown.send_replace(true);
                Ok(Response::Success {
                    message: "Shutting down".to_string(),
                })
            }
            Request::Watch { .. } => Ok(Response::error(
                "BadRequest",
                "Watch is handled by the connection loop",
            )),
        };
        result.unwrap_or_else(Response::from)
    }
}

async fn send(
    writer: &mut OwnedWriteHalf,
    resp: &Response,
) -> Result<(), Box<dyn std::error::Error>> {
    writer
        .write_all(serde_json::to_string(resp)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn watch_nodes(
    writer: &mut OwnedWriteHalf,
    daemon: &Daemon,
    interval_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(MIN_WATCH_MS)));
    let mut shutdown = daemon.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return Ok(()),
        }
        let frame = daemon.dispatch(Request::ListNodes);
        if send(writer, &frame).await.is_err() {
            // Client went away.
            return Ok(());
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    daemon: Arc<Daemon>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::error("BadRequest", format!("Invalid request: {e}"));
                send(&mut writer, &resp).await?;
                continue;
            }
        };

        if let Request::Watch { interval_ms } = request {
            return watch_nodes(&mut writer, &daemon, interval_ms).await;
        }
        let response = daemon.dispatch(request);
        send(&mut writer, &response).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let paths = AppPaths::new()?;
    info!("Data directory: {}", paths.data_dir().display());
    let config = match paths.load_config()? {
        Some(cfg) => {
            info!("Loaded {}", paths.config_file().display());
            cfg
        }
        None => {
            info!("No config at {}; using defaults", paths.config_file().display());
            SimulationConfig::default()
        }
    };

    let daemon = Arc::new(Daemon::new(config)?);
    daemon.sim.start()?;

    let addr = std::env::var("RADIANT_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("Radiant daemon listening on {addr}");

    let mut shutdown = daemon.shutdown.subscribe();
    let outcome = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        continue;
                    }
                };
                info!("Client connected: {peer}");
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, daemon).await {
                        error!("Client handler error: {e}");
                    }
                });
            }
            fatal = daemon.sim.wait_fatal() => break Err(fatal),
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break Ok(());
            }
            _ = shutdown.changed() => {
                info!("Shutdown requested");
                break Ok(());
            }
        }
    };

    daemon.sim.stop().await;
    match outcome {
        Ok(()) => Ok(()),
        Err(fatal) => {
            error!("Simulation aborted: {fatal}");
            Err(fatal.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daemon() -> Daemon {
        Daemon::new(SimulationConfig::default().with_seed(3)).unwrap()
    }

    #[test]
    fn create_then_query() {
        let d = daemon();
        let created = d.dispatch(Request::CreateNode {
            kind: "Block".into(),
            overrides: json!({"position": [1.0, 2.0, 3.0], "payload": "hello"}),
        });
        assert_eq!(created, Response::Created { id: 1 });

        match d.dispatch(Request::GetNode { id: 1 }) {
            Response::Node(view) => {
                assert_eq!(view.address.get(..7), Some("B-0001-"));
                assert_eq!(view.payload, json!("hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match d.dispatch(Request::GetHistory { id: 1 }) {
            Response::History { entries, .. } => assert!(entries.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        match d.dispatch(Request::GetStatus) {
            Response::Status(s) => assert_eq!(s.node_count, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_are_typed() {
        let d = daemon();
        let resp = d.dispatch(Request::CreateNode {
            kind: "cube".into(),
            overrides: json!(null),
        });
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "InvalidKind"));

        let resp = d.dispatch(Request::CreateNode {
            kind: "point".into(),
            overrides: json!({"speed": 3}),
        });
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "InvalidOverride"));

        let resp = d.dispatch(Request::GetNode { id: 42 });
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "NotFound"));
    }

    #[test]
    fn shutdown_flips_the_signal() {
        let d = daemon();
        let rx = d.shutdown.subscribe();
        assert!(matches!(d.dispatch(Request::Shutdown), Response::Success { .. }));
        assert!(*rx.borrow());
    }
}
