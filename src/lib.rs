//! Kolibri: a distributed evolutionary micro-AI node.
//!
//! Three coupled subsystems, each its own module: a tamper-evident
//! append-only [`log`] of everything the node does, an evolving [`pool`] of
//! small decimal [`gene`]s scored against taught examples, and a UDP
//! [`swarm`] transport for gossiping the best genes between nodes. [`node`]
//! wires the three together into a single cooperative runtime.

pub mod codec;
pub mod error;
pub mod gene;
pub mod log;
pub mod node;
pub mod pool;
pub mod rng;
pub mod swarm;

pub use error::NodeError;
pub use gene::Gene;
pub use node::{Config, Node};
pub use pool::{Example, Formula, Pool};
