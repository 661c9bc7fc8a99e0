//! Domain error kinds for each component boundary, matching the error
//! taxonomy in the specification's error handling design one-for-one.

use thiserror::Error;

/// Errors from the digit codec (component A).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("capacity exceeded: need {needed} digits, have {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },
    #[error("digit count {0} is not a multiple of three")]
    NotMultipleOfThree(usize),
    #[error("invalid digit {value} at offset {offset}")]
    InvalidDigit { offset: usize, value: u8 },
    #[error("byte overflow: triple at offset {offset} evaluates to {value}")]
    ByteOverflow { offset: usize, value: u32 },
}

/// Errors from gene arithmetic (component B).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum GeneError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("undefined slot {0} referenced")]
    UndefinedSlot(u8),
}

/// Errors from the formula pool (component C).
#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("capacity exceeded: pool already holds {capacity} examples")]
    CapacityExceeded { capacity: usize },
    #[error("gene not found in population (snapshot was overtaken)")]
    NotFound,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors from the genome log (component D).
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log file is missing")]
    Missing,
    #[error("log file length is not a multiple of 512 bytes")]
    Truncated,
    #[error("log integrity check failed at block {index}: {reason}")]
    Corrupt { index: u64, reason: String },
    #[error("hmac key too long: {0} bytes (max 64)")]
    KeyTooLong(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `verify`'s three-way outcome (not itself an error: `Missing`/`Corrupt`
/// are expected, inspectable results of a read-only scan).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Missing,
    Corrupt,
}

/// Errors from swarm transport (component E).
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("failed to bind udp socket: {0}")]
    BindError(std::io::Error),
    #[error("network error: {0}")]
    NetworkError(std::io::Error),
    #[error("dns resolution failed for {host}:{port}")]
    DnsError { host: String, port: u16 },
}

/// Errors from the node runtime (component F); also the crate's top-level
/// error, so `main` can match on a single type to pick an exit code.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Swarm(#[from] SwarmError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
