//! CLI client for the `radiantd` daemon.
//!
//! Examples:
//!   radiant-cli status
//!   radiant-cli list
//!   radiant-cli get 3
//!   radiant-cli history 3
//!   radiant-cli create point '{"position": [1, 2, 3], "payload": "point data"}'
//!   radiant-cli watch 250
//!   radiant-cli shutdown
//!
//! By default it talks to 127.0.0.1:8401; override with `--addr host:port`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

use radiant::protocol::{Request, Response, DEFAULT_ADDR};
use radiant::{HistoryEntry, NodeView, StatusSnapshot};

fn usage() -> ! {
    eprintln!("radiant-cli (talks to radiantd @ {DEFAULT_ADDR} by default)");
    eprintln!("Usage: radiant-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  status                      Population summary and tick rate");
    eprintln!("  list                        One line per node");
    eprintln!("  get <id>                    Full view of one node");
    eprintln!("  history <id>                Recorded ticks of one node, oldest first");
    eprintln!("  create <kind> [json]        Create a Block|Point|Sphere with optional overrides");
    eprintln!("  watch [ms]                  Stream the node table (default 500 ms)");
    eprintln!("  shutdown                    Stop the daemon");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = DEFAULT_ADDR.to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

struct Connection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Connection {
    fn open(addr: &str, read_timeout: Option<Duration>) -> Result<Self, String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
        stream
            .set_read_timeout(read_timeout)
            .map_err(|e| format!("set_read_timeout: {e}"))?;
        let reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);
        Ok(Self { stream, reader })
    }

    fn send(&mut self, req: &Request) -> Result<(), String> {
        let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
        self.stream
            .write_all(line.as_bytes())
            .and_then(|_| self.stream.write_all(b"\n"))
            .map_err(|e| format!("send: {e}"))
    }

    fn recv(&mut self) -> Result<Option<Response>, String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| format!("recv: {e}"))?;
        if n == 0 {
            return Ok(None);
        }
        serde_json::from_str(&line)
            .map(Some)
            .map_err(|e| format!("parse response: {e}"))
    }
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let mut conn = Connection::open(addr, Some(Duration::from_secs(5)))?;
    conn.send(req)?;
    conn.recv()?.ok_or_else(|| "connection closed".to_string())
}

fn print_status(s: &StatusSnapshot) {
    println!(
        "running={} nodes={} connections={} anchored={} degraded={} avg_gravity={:.4}",
        s.running,
        s.node_count,
        s.connection_count,
        s.anchored_count,
        s.degraded_count,
        s.average_gravity_magnitude,
    );
    let t = &s.tick_rate;
    println!(
        "ticks: total={} tasks={} rate={:.1}/s per_node=[{}..{}] uptime={:.1}s",
        t.total_ticks,
        t.active_tasks,
        t.ticks_per_second,
        t.min_node_ticks,
        t.max_node_ticks,
        t.uptime_secs,
    );
}

fn print_row(n: &NodeView) {
    let flag = if n.degraded {
        "degraded"
    } else if n.is_anchor {
        "anchor"
    } else {
        ""
    };
    println!(
        "{:>4} {:<16} {:<6} pos={:<26} g={:<8.4} nbrs={:?} {flag}",
        n.id,
        n.address,
        n.kind.name(),
        n.position.to_string(),
        n.gravity,
        n.neighbors,
    );
}

fn print_node(n: &NodeView) {
    println!("{} ({}) id={}", n.address, n.kind, n.id);
    println!("  payload     {} [{:?}]", n.payload, n.payload_kind);
    println!("  position    {}", n.position);
    println!("  velocity    {}", n.velocity);
    println!("  gravity     {:.6}", n.gravity);
    println!(
        "  threshold   {}  radius {}  interval {}s",
        n.connection_threshold, n.influence_radius, n.tick_interval
    );
    println!(
        "  attempts    {}/{}  max_degree {}",
        n.attempts,
        n.stability_window,
        n.max_degree
            .map_or_else(|| "unlimited".to_string(), |m| m.to_string())
    );
    println!(
        "  anchor={} degraded={} ticks={}",
        n.is_anchor, n.degraded, n.ticks
    );
    println!("  neighbors   {:?}", n.neighbors);
}

fn print_history(entries: &[HistoryEntry]) {
    for e in entries {
        println!(
            "#{:<6} t={} pos={} vel={} g={:.4} nbrs={:?}",
            e.idx, e.timestamp_ms, e.position, e.velocity, e.gravity, e.neighbors
        );
    }
}

fn watch(addr: &str, interval_ms: u64) -> Result<(), String> {
    let mut conn = Connection::open(addr, None)?;
    conn.send(&Request::Watch { interval_ms })?;
    while let Some(resp) = conn.recv()? {
        match resp {
            Response::Nodes { nodes } => {
                println!("--- {} nodes", nodes.len());
                nodes.iter().for_each(print_row);
            }
            Response::Error { kind, message } => return Err(format!("{kind}: {message}")),
            _ => {}
        }
    }
    Ok(())
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let make_error = |msg: &str| -> ! {
        eprintln!("{}", msg);
        process::exit(1);
    };

    let parse_id = |i: usize| -> u64 {
        match args.get(i) {
            Some(s) => s
                .parse()
                .unwrap_or_else(|_| make_error("id must be a positive integer")),
            None => usage(),
        }
    };

    let req = match cmd.as_str() {
        "status" => Request::GetStatus,
        "list" => Request::ListNodes,
        "get" => Request::GetNode { id: parse_id(1) },
        "history" => Request::GetHistory { id: parse_id(1) },
        "create" => {
            if args.len() < 2 {
                usage();
            }
            let overrides = match args.get(2) {
                Some(raw) => serde_json::from_str(raw)
                    .unwrap_or_else(|e| make_error(&format!("overrides must be JSON: {e}"))),
                None => serde_json::Value::Null,
            };
            Request::CreateNode {
                kind: args[1].clone(),
                overrides,
            }
        }
        "watch" => {
            let ms = match args.get(1) {
                Some(s) => s
                    .parse()
                    .unwrap_or_else(|_| make_error("watch interval must be milliseconds")),
                None => 500,
            };
            if let Err(e) = watch(&addr, ms) {
                make_error(&format!("Failed: {e}"));
            }
            process::exit(0);
        }
        "shutdown" => Request::Shutdown,
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(Response::Status(s)) => print_status(&s),
        Ok(Response::Nodes { nodes }) => nodes.iter().for_each(print_row),
        Ok(Response::Node(n)) => print_node(&n),
        Ok(Response::History { entries, .. }) => print_history(&entries),
        Ok(Response::Created { id }) => println!("created node {id}"),
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Error { kind, message }) => {
            eprintln!("Error ({kind}): {message}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}
