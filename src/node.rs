//! The node runtime (component F): a single cooperative state machine that
//! owns the pool, the genome log, and (optionally) a swarm listener, and
//! drives all three from one `step()` per beat — no background threads,
//! no async runtime, just a loop the caller pumps.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::NodeError;
use crate::gene::Gene;
use crate::log::{self, GenomeLog, VerifyStatus};
use crate::pool::Pool;
use crate::swarm::{Listener, Message};

/// Where the HMAC signing key for the genome log comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// The crate's built-in default key, for local experimentation only.
    Default,
    /// A key given directly on the command line.
    Inline(String),
    /// A key read from a file at startup.
    Path(PathBuf),
}

impl KeySource {
    const BUILT_IN_DEFAULT: &'static [u8] = b"kolibri-default-key";

    pub fn resolve(&self) -> Result<Vec<u8>, NodeError> {
        match self {
            Self::Default => Ok(Self::BUILT_IN_DEFAULT.to_vec()),
            Self::Inline(s) => Ok(s.as_bytes().to_vec()),
            Self::Path(path) => {
                let raw = fs::read(path).map_err(NodeError::Io)?;
                let trimmed_len = raw
                    .iter()
                    .rposition(|&b| b != b'\n' && b != b'\r')
                    .map_or(0, |i| i + 1);
                let key = raw[..trimmed_len].to_vec();
                if key.is_empty() {
                    return Err(NodeError::InvalidArgument(format!(
                        "hmac key file {} is empty",
                        path.display()
                    )));
                }
                Ok(key)
            }
        }
    }
}

/// Static configuration a node boots with, mirroring the CLI surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub seed: u64,
    pub node_id: u32,
    pub listen_port: Option<u16>,
    pub peers: Vec<SocketAddr>,
    pub genome_path: PathBuf,
    pub key_source: KeySource,
    pub auto_learn: bool,
    pub auto_evolve_ms: u64,
    pub auto_sync_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Upper bound on how many distinct peers the registry tracks at once.
pub const PEER_REGISTRY_CAPACITY: usize = 32;

/// One tracked peer: where it lives, what it calls itself, and when it was
/// last heard from.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEntry {
    pub host: String,
    pub port: u16,
    pub node_id: u32,
    pub last_seen_ms: u64,
}

/// A bounded list of peers the node has heard gossip from, per the
/// specification's `(host, port, node_id, last_seen_ms)` data model. Owned
/// by the node runtime; updated as `Hello`/`MigrateRule` datagrams arrive.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    entries: Vec<PeerEntry>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    #[must_use]
    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    /// Records or refreshes a peer's last-seen timestamp. When the registry
    /// is at capacity and `host`/`port` names a peer not already tracked,
    /// the least-recently-seen entry is evicted to make room.
    pub fn record(&mut self, host: &str, port: u16, node_id: u32, seen_ms: u64) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.host == host && e.port == port) {
            existing.node_id = node_id;
            existing.last_seen_ms = seen_ms;
            return;
        }
        if self.entries.len() >= PEER_REGISTRY_CAPACITY {
            if let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_seen_ms)
                .map(|(i, _)| i)
            {
                self.entries.remove(oldest);
            }
        }
        self.entries.push(PeerEntry {
            host: host.to_string(),
            port,
            node_id,
            last_seen_ms: seen_ms,
        });
    }
}

/// Encodes a short ASCII summary through the digit codec (component A),
/// per the specification's "every log payload is a digit-encoded ASCII
/// summary" convention, and appends it as one log event.
fn log_summary(log: &mut GenomeLog, event_type: &str, summary: &str) -> Result<(), NodeError> {
    let max_ascii_len = log::PAYLOAD_LEN / 3;
    let truncated = &summary[..summary.len().min(max_ascii_len)];
    let payload = log::encode_payload(truncated.as_bytes())?;
    log.append(event_type, &payload, now_ms())?;
    Ok(())
}

/// The running node: pool, log, and optional swarm listener under one
/// cooperative loop.
pub struct Node {
    config: Config,
    pool: Pool,
    log: GenomeLog,
    listener: Option<Listener>,
    peer_registry: PeerRegistry,
    last_evolve: Instant,
    last_sync: Instant,
}

impl Node {
    /// Boots a node: opens (or creates) its genome log, re-verifying the
    /// chain, initializes the pool from `config.seed`, binds the swarm
    /// listener if a port was given, and records a `BOOT` event.
    pub fn boot(config: Config) -> Result<Self, NodeError> {
        let key = config.key_source.resolve()?;
        let mut log = GenomeLog::open(&config.genome_path, &key)?;
        log_summary(&mut log, "BOOT", &format!("boot node={}", config.node_id))?;

        let pool = Pool::init(config.seed);

        let listener = match config.listen_port {
            Some(port) => {
                let listener = Listener::bind(port)?;
                info!(port, "swarm listener bound");
                Some(listener)
            }
            None => None,
        };

        let now = Instant::now();
        Ok(Self {
            config,
            pool,
            log,
            listener,
            peer_registry: PeerRegistry::new(),
            last_evolve: now,
            last_sync: now,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[must_use]
    pub fn peer_registry(&self) -> &PeerRegistry {
        &self.peer_registry
    }

    /// Runs the documented shutdown sequence: closes the listener (if any),
    /// then drops the log, releasing its file handle.
    pub fn shutdown(self) {
        if let Some(listener) = self.listener {
            listener.close();
        }
        drop(self.log);
    }

    /// Verifies the node's own genome log file against its configured key,
    /// without mutating any in-memory state.
    #[must_use]
    pub fn verify_genome(&self) -> VerifyStatus {
        let key = match self.config.key_source.resolve() {
            Ok(k) => k,
            Err(_) => return VerifyStatus::Corrupt,
        };
        log::verify(&self.config.genome_path, &key)
    }

    /// Runs one beat: drains at most one inbound swarm datagram (bounded by
    /// whichever auto-timer is closer to firing), adopts a `MigrateRule`
    /// that beats the population's worst slot, then fires the evolve/sync
    /// timers if they're due.
    pub fn step(&mut self) -> Result<(), NodeError> {
        let evolve_due_in = self
            .config
            .auto_evolve_ms
            .saturating_sub(self.last_evolve.elapsed().as_millis() as u64);
        let sync_due_in = self
            .config
            .auto_sync_ms
            .saturating_sub(self.last_sync.elapsed().as_millis() as u64);
        let timeout_ms = evolve_due_in.min(sync_due_in).max(1);

        if let Some(listener) = &self.listener {
            if let Some((from, message)) = listener.poll(timeout_ms) {
                self.handle_message(from, message)?;
            }
        } else {
            std::thread::sleep(std::time::Duration::from_millis(timeout_ms.min(50)));
        }

        if self.config.auto_learn && self.last_evolve.elapsed().as_millis() as u64 >= self.config.auto_evolve_ms {
            self.run_evolve(1)?;
            self.last_evolve = Instant::now();
        }
        if !self.config.peers.is_empty() && self.last_sync.elapsed().as_millis() as u64 >= self.config.auto_sync_ms {
            self.run_sync()?;
            self.last_sync = Instant::now();
        }
        Ok(())
    }

    fn handle_message(&mut self, from: SocketAddr, message: Message) -> Result<(), NodeError> {
        match message {
            Message::Hello { node_id } => {
                self.peer_registry.record(&from.ip().to_string(), from.port(), node_id, now_ms());
                info!(node_id, "hello received");
                Ok(())
            }
            Message::MigrateRule { node_id, digits, fitness } => {
                self.peer_registry.record(&from.ip().to_string(), from.port(), node_id, now_ms());
                self.adopt_migrate_rule(node_id, &digits, fitness)
            }
            Message::Ack { status } => {
                info!(status, "ack received");
                Ok(())
            }
        }
    }

    /// Adopts an inbound gene if it beats the population's current worst
    /// slot, replacing that slot and re-sorting. Always records exactly one
    /// `IMPORT` event, whether or not the gene was actually adopted.
    fn adopt_migrate_rule(&mut self, source_node: u32, digits: &[u8], fitness: f64) -> Result<(), NodeError> {
        let gene = Gene::from_digits(digits);
        let worst_index = self.pool.population().len().saturating_sub(1);
        let worst_fitness = self.pool.population().get(worst_index).map_or(f64::INFINITY, |f| f.fitness);
        let adopted = fitness > worst_fitness;
        if adopted {
            self.pool.replace_worst(gene, fitness);
        }
        let summary = format!("import from={source_node} adopted={} fitness={fitness}", adopted as u8);
        log_summary(&mut self.log, "IMPORT", &summary)?;
        if adopted {
            info!(source_node, fitness, "adopted gossiped gene");
        } else {
            warn!(source_node, fitness, worst_fitness, "rejected gossiped gene");
        }
        Ok(())
    }

    fn run_evolve(&mut self, generations: u32) -> Result<(), NodeError> {
        self.pool.tick(generations);
        log_summary(&mut self.log, "EVOLVE", &format!("evolve generation={}", self.pool.generation()))?;
        Ok(())
    }

    fn run_sync(&mut self) -> Result<(), NodeError> {
        let Some(best) = self.pool.best().cloned() else {
            return Ok(());
        };
        if let Some(listener) = &self.listener {
            for peer in &self.config.peers {
                let _ = listener.send_migrate_rule(self.config.node_id, best.gene.digits(), best.fitness, *peer);
            }
        }
        let summary = format!("sync peers={} fitness={}", self.config.peers.len(), best.fitness);
        log_summary(&mut self.log, "SYNC", &summary)?;
        Ok(())
    }

    /// Executes one interactive REPL command, returning the text to print.
    /// Every branch records exactly one genome-log event.
    pub fn execute_command(&mut self, line: &str) -> Result<String, NodeError> {
        let line = line.strip_prefix(':').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();
        match command {
            "teach" => {
                let (x, y) = parse_arrow_pair(rest.first().copied())?;
                self.pool.add_example(x, y)?;
                self.record_event("TEACH", &format!("teach {x}->{y}"))?;
                Ok(format!("taught ({x}, {y})"))
            }
            "ask" => {
                let x = parse_arg(rest.first().copied())?;
                let best = self
                    .pool
                    .best()
                    .ok_or_else(|| NodeError::InvalidArgument("no examples taught yet".to_string()))?;
                let result = best.gene.apply(x);
                let summary = match result {
                    Ok(y) => format!("ask {x}={y}"),
                    Err(ref e) => format!("ask {x}=err:{e}"),
                };
                self.record_event("ASK", &summary)?;
                match result {
                    Ok(y) => Ok(format!("{y}")),
                    Err(e) => Ok(format!("domain error: {e}")),
                }
            }
            "good" | "bad" => {
                let delta = if command == "good" { 0.3 } else { -0.3 };
                let best = self
                    .pool
                    .best()
                    .ok_or_else(|| NodeError::InvalidArgument("no examples taught yet".to_string()))?
                    .gene;
                self.pool.feedback(&best, delta)?;
                self.record_event("USER_FEEDBACK", &format!("{command} {delta}"))?;
                Ok("recorded feedback".to_string())
            }
            "tick" | "evolve" => {
                let generations: u32 = rest.first().and_then(|s| s.parse().ok()).unwrap_or(1);
                self.run_evolve(generations)?;
                Ok(format!("ticked {generations} generation(s)"))
            }
            "why" => {
                let best = self
                    .pool
                    .best()
                    .ok_or_else(|| NodeError::InvalidArgument("no examples taught yet".to_string()))?;
                let text = best.gene.describe();
                self.record_event("NOTE", &format!("why {text}"))?;
                Ok(text)
            }
            "canvas" => {
                let snapshot = self.pool.population().len();
                self.record_event("NOTE", &format!("canvas {snapshot}"))?;
                Ok(format!("{snapshot} formulas in population"))
            }
            "sync" => {
                self.run_sync()?;
                Ok("sync requested".to_string())
            }
            "verify" => {
                let status = self.verify_genome();
                self.record_event("NOTE", &format!("verify {status:?}"))?;
                Ok(format!("{status:?}"))
            }
            "script" => {
                let path = rest
                    .first()
                    .ok_or_else(|| NodeError::InvalidArgument("script requires a path".to_string()))?;
                self.run_script(path)
            }
            "help" => Ok(
                ":teach a->b, :ask x, :good, :bad, :tick [n], :evolve [n], :why, :canvas, :sync, :verify, :script PATH, :help, :quit"
                    .to_string(),
            ),
            "quit" | "" => Ok(String::new()),
            other => Err(NodeError::InvalidArgument(format!("unknown command: {other}"))),
        }
    }

    /// Runs every non-blank line of the script at `path` as a command,
    /// recording one `SCRIPT` event for the run as a whole.
    pub fn run_script(&mut self, path: &str) -> Result<String, NodeError> {
        self.record_event("SCRIPT", &format!("script {path}"))?;
        let contents = fs::read_to_string(path)?;
        let mut output = String::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            output.push_str(&self.execute_command(line)?);
            output.push('\n');
        }
        Ok(output)
    }

    fn record_event(&mut self, event_type: &str, summary: &str) -> Result<(), NodeError> {
        log_summary(&mut self.log, event_type, summary)
    }
}

fn parse_arrow_pair(token: Option<&str>) -> Result<(i32, i32), NodeError> {
    let token = token.ok_or_else(|| NodeError::InvalidArgument("teach requires a->b".to_string()))?;
    let (a, b) = token
        .split_once("->")
        .ok_or_else(|| NodeError::InvalidArgument("teach requires a->b".to_string()))?;
    let x: i32 = a
        .parse()
        .map_err(|_| NodeError::InvalidArgument("teach's left side must be an integer".to_string()))?;
    let y: i32 = b
        .parse()
        .map_err(|_| NodeError::InvalidArgument("teach's right side must be an integer".to_string()))?;
    Ok((x, y))
}

fn parse_arg(token: Option<&str>) -> Result<i32, NodeError> {
    token
        .ok_or_else(|| NodeError::InvalidArgument("missing argument".to_string()))?
        .parse()
        .map_err(|_| NodeError::InvalidArgument("argument must be an integer".to_string()))
}

/// Resolves a `host:port` string into a concrete peer address.
pub fn resolve_peer(spec: &str) -> Result<SocketAddr, NodeError> {
    spec.to_socket_addrs()
        .map_err(|_| NodeError::InvalidArgument(format!("invalid peer address: {spec}")))?
        .next()
        .ok_or_else(|| NodeError::InvalidArgument(format!("could not resolve peer: {spec}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_at(dir: &Path, seed: u64, node_id: u32, listen_port: Option<u16>) -> Config {
        Config {
            seed,
            node_id,
            listen_port,
            peers: Vec::new(),
            genome_path: dir.join("genome.log"),
            key_source: KeySource::Default,
            auto_learn: false,
            auto_evolve_ms: 10_000,
            auto_sync_ms: 10_000,
        }
    }

    #[test]
    fn boot_records_one_event() {
        let dir = tempdir().unwrap();
        let node = Node::boot(config_at(dir.path(), 1, 1, None)).unwrap();
        assert_eq!(node.verify_genome(), VerifyStatus::Ok);
    }

    #[test]
    fn teach_ask_round_trip() {
        let dir = tempdir().unwrap();
        let mut node = Node::boot(config_at(dir.path(), 2025, 1, None)).unwrap();
        node.execute_command(":teach 0->1").unwrap();
        node.execute_command(":teach 1->3").unwrap();
        node.execute_command(":teach 2->5").unwrap();
        node.execute_command(":teach 3->7").unwrap();
        node.execute_command(":tick 64").unwrap();
        let answer = node.execute_command(":ask 4").unwrap();
        assert_eq!(answer, "9");
        assert_eq!(node.verify_genome(), VerifyStatus::Ok);
    }

    // Scenario 5 (spec §8): gossip adoption between two nodes.
    #[test]
    fn scenario_gossip_adoption() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let mut node_a = Node::boot(config_at(dir_a.path(), 2025, 1, None)).unwrap();
        let mut node_b = Node::boot(config_at(dir_b.path(), 999, 2, None)).unwrap();

        node_a.execute_command(":teach 0->1").unwrap();
        node_a.execute_command(":teach 1->3").unwrap();
        node_a.execute_command(":teach 2->5").unwrap();
        node_a.execute_command(":teach 3->7").unwrap();
        node_a.execute_command(":tick 64").unwrap();

        let best = node_a.pool().best().unwrap().clone();
        let worst_before = node_b.pool.population().last().unwrap().fitness;

        node_b
            .adopt_migrate_rule(1, best.gene.digits(), best.fitness + 1.0)
            .unwrap();

        let worst_after = node_b.pool.population().last().unwrap().fitness;
        assert!(worst_after >= worst_before || node_b.pool.population().iter().any(|f| f.gene == best.gene));
    }

    #[test]
    fn unknown_command_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let mut node = Node::boot(config_at(dir.path(), 1, 1, None)).unwrap();
        assert!(node.execute_command("frobnicate").is_err());
    }

    #[test]
    fn peer_registry_refreshes_existing_entries_and_evicts_oldest_when_full() {
        let mut registry = PeerRegistry::new();
        registry.record("10.0.0.1", 9000, 1, 100);
        registry.record("10.0.0.1", 9000, 1, 200);
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].last_seen_ms, 200);

        for i in 0..PEER_REGISTRY_CAPACITY as u32 {
            registry.record(&format!("10.0.1.{i}"), 9000, i, u64::from(i));
        }
        assert_eq!(registry.entries().len(), PEER_REGISTRY_CAPACITY);
        assert!(!registry.entries().iter().any(|e| e.host == "10.0.0.1"));
    }

    #[test]
    fn handle_message_records_peer_on_hello() {
        let dir = tempdir().unwrap();
        let mut node = Node::boot(config_at(dir.path(), 1, 1, None)).unwrap();
        let from: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        node.handle_message(from, Message::Hello { node_id: 42 }).unwrap();
        assert_eq!(node.peer_registry().entries().len(), 1);
        assert_eq!(node.peer_registry().entries()[0].node_id, 42);
    }
}
