//! Command-line entry point: argument parsing, logging setup, and the
//! interactive REPL loop over a single [`kolibri::Node`].

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use kolibri::log::VerifyStatus;
use kolibri::node::{Config, KeySource, Node};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Distributed evolutionary micro-AI node.
#[derive(Parser, Debug)]
#[command(name = "kolibri", version, about)]
struct Args {
    /// Deterministic seed for the formula pool's random generator.
    #[arg(long, default_value_t = 2025)]
    seed: u64,

    /// This node's numeric identifier, carried in gossip and log events.
    #[arg(long, default_value_t = 1)]
    node_id: u32,

    /// UDP port to listen for swarm gossip on. Omit to run offline.
    #[arg(long)]
    listen: Option<u16>,

    /// A peer to gossip with, `host:port`. May be given multiple times.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Path to the genome log file.
    #[arg(long, default_value = "kolibri.genome")]
    genome: String,

    /// A script of `:`-prefixed commands to run once at boot.
    #[arg(long)]
    bootstrap: Option<String>,

    /// Verify the genome log's integrity and exit without starting.
    #[arg(long, default_value_t = false)]
    verify_genome: bool,

    /// Print a one-line JSON health report and exit without starting.
    #[arg(long, default_value_t = false)]
    health: bool,

    /// HMAC signing key for the genome log, given inline.
    #[arg(long)]
    hmac_key: Option<String>,

    /// HMAC signing key for the genome log, read from a file.
    #[arg(long)]
    hmac_key_path: Option<String>,

    /// Automatically tick the pool on the `auto-evolve-ms` cadence.
    #[arg(long, default_value_t = true)]
    auto_learn: bool,

    #[arg(long, default_value_t = false, hide = true)]
    no_auto_learn: bool,

    /// Milliseconds between automatic evolutionary ticks.
    #[arg(long, default_value_t = 2_000)]
    auto_evolve_ms: u64,

    /// Milliseconds between automatic swarm broadcasts of the best gene.
    #[arg(long, default_value_t = 5_000)]
    auto_sync_ms: u64,
}

#[derive(Serialize)]
struct GenomeHealth {
    path: String,
    origin: String,
    state: String,
}

#[derive(Serialize)]
struct Health {
    status: String,
    node_id: u32,
    seed: u64,
    genome: GenomeHealth,
}

fn key_source_origin(key_source: &KeySource) -> &'static str {
    match key_source {
        KeySource::Default => "default",
        KeySource::Inline(_) => "inline",
        KeySource::Path(_) => "path",
    }
}

fn verify_state(status: VerifyStatus) -> &'static str {
    match status {
        VerifyStatus::Ok => "ok",
        VerifyStatus::Missing => "missing",
        VerifyStatus::Corrupt => "corrupt",
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kolibri=info".parse().unwrap()))
        .with_target(false)
        .init();

    let key_source = match (&args.hmac_key, &args.hmac_key_path) {
        (Some(inline), _) => KeySource::Inline(inline.clone()),
        (None, Some(path)) => KeySource::Path(path.into()),
        (None, None) => KeySource::Default,
    };

    let auto_learn = args.auto_learn && !args.no_auto_learn;

    if args.health {
        let key = match key_source.resolve() {
            Ok(k) => k,
            Err(e) => {
                eprintln!("error resolving hmac key: {e}");
                return ExitCode::from(1);
            }
        };
        let state = verify_state(kolibri::log::verify(args.genome.as_ref(), &key));
        let health = Health {
            status: if state == "ok" { "ok" } else { "error" }.to_string(),
            node_id: args.node_id,
            seed: args.seed,
            genome: GenomeHealth {
                path: args.genome.clone(),
                origin: key_source_origin(&key_source).to_string(),
                state: state.to_string(),
            },
        };
        println!("{}", serde_json::to_string(&health).unwrap());
        return ExitCode::from(if state == "ok" { 0 } else { 1 });
    }

    // Pre-boot gate: verify before opening the log for real, per spec §6.
    // A missing file is not a failure (the first boot creates it); only a
    // corrupt chain stops the node from starting.
    if args.verify_genome {
        let key = match key_source.resolve() {
            Ok(k) => k,
            Err(e) => {
                eprintln!("error resolving hmac key: {e}");
                return ExitCode::from(1);
            }
        };
        if kolibri::log::verify(args.genome.as_ref(), &key) == VerifyStatus::Corrupt {
            eprintln!("genome log corrupt");
            return ExitCode::from(2);
        }
    }

    let peers: Vec<_> = match args
        .peers
        .iter()
        .map(|p| kolibri::node::resolve_peer(p))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    let config = Config {
        seed: args.seed,
        node_id: args.node_id,
        listen_port: args.listen,
        peers,
        genome_path: args.genome.into(),
        key_source,
        auto_learn,
        auto_evolve_ms: args.auto_evolve_ms,
        auto_sync_ms: args.auto_sync_ms,
    };

    let mut node = match Node::boot(config) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("failed to boot node: {e}");
            return ExitCode::from(1);
        }
    };

    if let Some(path) = &args.bootstrap {
        if let Err(e) = node.run_script(path) {
            eprintln!("bootstrap script failed: {e}");
            return ExitCode::from(1);
        }
    }

    let exit_code = run_repl(&mut node);
    node.shutdown();
    exit_code
}

fn run_repl(node: &mut Node) -> ExitCode {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("kolibri> ");
    let _ = stdout.flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if !trimmed.is_empty() {
            match node.execute_command(trimmed) {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{output}");
                    }
                }
                Err(e) => eprintln!("error: {e}"),
            }
        }
        print!("kolibri> ");
        let _ = stdout.flush();
    }
    ExitCode::from(0)
}
