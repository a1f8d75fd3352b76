use std::time::Duration;

use radiant::{NodeKind, NodeOverrides, NodeView, Simulation, SimulationConfig, Vec3};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("radiant: run a mixed population for a while and print where it settled");
    println!();
    println!("Usage: radiant [--seconds N] [--seed N]");
    println!();
    println!("  --seconds N   how long to let the scheduler run (default 5)");
    println!("  --seed N      make spawn positions reproducible");
    println!();
    println!("Logging follows RUST_LOG (default: info).");
}

struct Args {
    seconds: f64,
    seed: Option<u64>,
}

fn parse_args() -> Result<Args, String> {
    let mut out = Args {
        seconds: 5.0,
        seed: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => {
                print_help();
                std::process::exit(0);
            }
            "--seconds" => {
                let v = it.next().ok_or("--seconds needs a value")?;
                out.seconds = v
                    .parse()
                    .ok()
                    .filter(|s: &f64| s.is_finite() && *s >= 0.0)
                    .ok_or(format!("bad --seconds: {v}"))?;
            }
            "--seed" => {
                let v = it.next().ok_or("--seed needs a value")?;
                out.seed = Some(v.parse().map_err(|_| format!("bad --seed: {v}"))?);
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(out)
}

/// Text, vector, matrix, byte-string and mapping payloads, one of each kind.
fn population() -> Vec<(NodeKind, Value)> {
    use NodeKind::{Block, Point, Sphere};
    vec![
        (Block, json!("block data")),
        (Point, json!("point data")),
        (Sphere, json!("sphere data")),
        (Block, json!([0.12, 0.55, 0.31, 0.94, 0.07])),
        (Point, json!([0.61, 0.18, 0.77, 0.42, 0.29])),
        (Sphere, json!([0.85, 0.33, 0.05, 0.68, 0.51])),
        (Block, json!([[1.0, 2.0], [3.0, 4.0]])),
        (Point, json!([[7, 3], [3, 50]])),
        (Sphere, json!([[0, -1], [1, 0]])),
        (Block, json!(b"block data as bytes".to_vec())),
        (Point, json!(b"point data as bytes".to_vec())),
        (Sphere, json!(b"sphere data as bytes".to_vec())),
        (Block, json!({"block data": 123, "some_key": [1, 2, 3]})),
        (Point, json!({"point data": 456, "other_key": {"a": 1, "b": 2}})),
        (Sphere, json!({"sphere data": 789, "some_key": {"x": 10, "y": 20}})),
    ]
}

fn print_table(nodes: &[NodeView]) {
    println!(
        "{:>4} {:<16} {:<6} {:<28} {:>8} {:<7} neighbors",
        "id", "address", "kind", "position", "gravity", "anchor"
    );
    for n in nodes {
        println!(
            "{:>4} {:<16} {:<6} {:<28} {:>8.4} {:<7} {:?}",
            n.id,
            n.address,
            n.kind.name(),
            n.position.to_string(),
            n.gravity,
            n.is_anchor,
            n.neighbors,
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            std::process::exit(2);
        }
    };

    let mut config = SimulationConfig::default();
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    let sim = Simulation::new(config)?;

    for (kind, payload) in population() {
        sim.create_node_kind(kind, NodeOverrides::default().with_payload(payload))?;
    }
    // One fast-moving straggler to show drift.
    sim.create_node_kind(
        NodeKind::Point,
        NodeOverrides::default()
            .at(Vec3::new(0.0, 0.0, 0.0))
            .with_velocity(Vec3::new(0.5, 0.5, 0.0))
            .with_payload(json!("point data")),
    )?;

    sim.start()?;
    info!(seconds = args.seconds, "running");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(args.seconds)) => {}
        fatal = sim.wait_fatal() => {
            sim.stop().await;
            return Err(fatal.into());
        }
    }
    sim.stop().await;

    let status = sim.get_status()?;
    println!();
    println!(
        "nodes={} connections={} anchored={} degraded={} avg_gravity={:.4} ticks={} ({:.1}/s)",
        status.node_count,
        status.connection_count,
        status.anchored_count,
        status.degraded_count,
        status.average_gravity_magnitude,
        status.tick_rate.total_ticks,
        status.tick_rate.ticks_per_second,
    );
    println!();
    print_table(&sim.list_node_snapshots()?);
    sim.check_invariants()?;
    Ok(())
}
