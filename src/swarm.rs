//! Swarm transport (component E): a minimal UDP wire protocol for
//! gossiping genes between nodes.
//!
//! Framing is a three-byte magic (`K`, `O`, `S`), a one-byte type tag, and
//! then big-endian fixed/variable fields. The socket is non-blocking with a
//! bounded read timeout so a node's cooperative event loop can poll it
//! alongside its other periodic work, the same way the teacher crate keeps
//! everything on one thread rather than spawning async tasks.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::error::SwarmError;
use crate::gene::GENE_CAPACITY;

const MAGIC: [u8; 3] = [b'K', b'O', b'S'];
const TYPE_HELLO: u8 = 0x01;
const TYPE_MIGRATE_RULE: u8 = 0x02;
const TYPE_ACK: u8 = 0x03;

/// Maximum UDP datagram size this transport will ever send or accept.
const MAX_DATAGRAM: usize = 4 + 1 + GENE_CAPACITY + 8;

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello { node_id: u32 },
    MigrateRule { node_id: u32, digits: Vec<u8>, fitness: f64 },
    Ack { status: u8 },
}

fn header(type_tag: u8) -> [u8; 4] {
    [MAGIC[0], MAGIC[1], MAGIC[2], type_tag]
}

fn check_header(buf: &[u8]) -> Option<u8> {
    if buf.len() < 4 || buf[0..3] != MAGIC {
        return None;
    }
    Some(buf[3])
}

/// Encodes a `Hello` message: `4B 4F 53 01` followed by `node_id` big-endian.
#[must_use]
pub fn encode_hello(node_id: u32) -> Vec<u8> {
    let mut out = header(TYPE_HELLO).to_vec();
    out.extend_from_slice(&node_id.to_be_bytes());
    out
}

/// Encodes a `MigrateRule` message: header, `node_id`, a one-byte gene
/// length, the gene's digits (one byte each, `0..=9`), and an 8-byte
/// big-endian fitness (IEEE-754 bit pattern).
///
/// `digits.len()` must fit in a `u8` and not exceed [`GENE_CAPACITY`];
/// callers are expected to validate a gene before sending it, so this
/// never fails in practice.
#[must_use]
pub fn encode_migrate_rule(node_id: u32, digits: &[u8], fitness: f64) -> Vec<u8> {
    let mut out = header(TYPE_MIGRATE_RULE).to_vec();
    out.extend_from_slice(&node_id.to_be_bytes());
    out.push(digits.len() as u8);
    out.extend_from_slice(digits);
    out.extend_from_slice(&fitness.to_bits().to_be_bytes());
    out
}

/// Encodes an `Ack` message: header followed by a one-byte status.
#[must_use]
pub fn encode_ack(status: u8) -> Vec<u8> {
    let mut out = header(TYPE_ACK).to_vec();
    out.push(status);
    out
}

/// Decodes a datagram into a [`Message`]. Returns `None` for anything that
/// doesn't parse cleanly: bad magic, unknown type tag, truncated fields, or
/// a `MigrateRule` whose declared `gene_length` exceeds [`GENE_CAPACITY`] —
/// oversized lengths are rejected outright rather than clamped, since a
/// clamp would silently accept a corrupted or hostile peer's framing.
#[must_use]
pub fn decode(buf: &[u8]) -> Option<Message> {
    let type_tag = check_header(buf)?;
    match type_tag {
        TYPE_HELLO => {
            if buf.len() != 8 {
                return None;
            }
            let node_id = u32::from_be_bytes(buf[4..8].try_into().ok()?);
            Some(Message::Hello { node_id })
        }
        TYPE_MIGRATE_RULE => {
            if buf.len() < 9 {
                return None;
            }
            let node_id = u32::from_be_bytes(buf[4..8].try_into().ok()?);
            let gene_length = buf[8] as usize;
            if gene_length > GENE_CAPACITY {
                return None;
            }
            let digits_start = 9;
            let digits_end = digits_start + gene_length;
            let fitness_end = digits_end + 8;
            if buf.len() != fitness_end {
                return None;
            }
            let digits = buf[digits_start..digits_end].to_vec();
            if digits.iter().any(|&d| d > 9) {
                return None;
            }
            let fitness_bits = u64::from_be_bytes(buf[digits_end..fitness_end].try_into().ok()?);
            Some(Message::MigrateRule {
                node_id,
                digits,
                fitness: f64::from_bits(fitness_bits),
            })
        }
        TYPE_ACK => {
            if buf.len() != 5 {
                return None;
            }
            Some(Message::Ack { status: buf[4] })
        }
        _ => None,
    }
}

/// A bound, non-blocking UDP endpoint polled cooperatively by the node
/// runtime's main loop.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
}

impl Listener {
    /// Binds a UDP socket on `0.0.0.0:port` and puts it in non-blocking
    /// read-timeout mode.
    pub fn bind(port: u16) -> Result<Self, SwarmError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(SwarmError::BindError)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(SwarmError::BindError)?;
        Ok(Self { socket })
    }

    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|a| a.port())
    }

    /// Waits up to `timeout_ms` for one datagram and decodes it, returning
    /// the sender's address alongside the message. Malformed or oversized
    /// datagrams are silently dropped (this returns `None`, not an error) —
    /// a hostile or buggy peer never gets to crash a node or force a log
    /// entry.
    pub fn poll(&self, timeout_ms: u64) -> Option<(SocketAddr, Message)> {
        self.socket
            .set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))
            .ok()?;
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((n, addr)) => decode(&buf[..n]).map(|message| (addr, message)),
            Err(_) => None,
        }
    }

    /// Closes the listener. Dropping a `Listener` already closes its socket
    /// implicitly, but the node runtime's documented shutdown sequence
    /// ("the listener is closed, then the log is flushed and closed") needs
    /// an explicit call site to close the listener strictly before the log.
    pub fn close(self) {
        drop(self.socket);
    }

    pub fn send_hello(&self, node_id: u32, to: impl ToSocketAddrs) -> Result<(), SwarmError> {
        self.socket
            .send_to(&encode_hello(node_id), to)
            .map_err(SwarmError::NetworkError)?;
        Ok(())
    }

    pub fn send_migrate_rule(
        &self,
        node_id: u32,
        digits: &[u8],
        fitness: f64,
        to: impl ToSocketAddrs,
    ) -> Result<(), SwarmError> {
        self.socket
            .send_to(&encode_migrate_rule(node_id, digits, fitness), to)
            .map_err(SwarmError::NetworkError)?;
        Ok(())
    }

    pub fn send_ack(&self, status: u8, to: impl ToSocketAddrs) -> Result<(), SwarmError> {
        self.socket
            .send_to(&encode_ack(status), to)
            .map_err(SwarmError::NetworkError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario 4 (spec §8): wire hello.
    #[test]
    fn scenario_wire_hello() {
        let bytes = encode_hello(42);
        assert_eq!(bytes, vec![0x4B, 0x4F, 0x53, 0x01, 0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(decode(&bytes), Some(Message::Hello { node_id: 42 }));
    }

    #[test]
    fn migrate_rule_round_trips() {
        let digits = vec![2, 0, 0, 0, 0, 1, 0];
        let bytes = encode_migrate_rule(7, &digits, 0.875);
        assert_eq!(
            decode(&bytes),
            Some(Message::MigrateRule {
                node_id: 7,
                digits: digits.clone(),
                fitness: 0.875,
            })
        );
    }

    #[test]
    fn ack_round_trips() {
        let bytes = encode_ack(1);
        assert_eq!(decode(&bytes), Some(Message::Ack { status: 1 }));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let bytes = vec![0x00, 0x4F, 0x53, 0x01, 0, 0, 0, 1];
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let bytes = vec![0x4B, 0x4F, 0x53, 0xFF];
        assert_eq!(decode(&bytes), None);
    }

    // Scenario 6 (spec §8): bad datagram with an oversized gene_length is
    // silently dropped rather than clamped or treated as an error.
    #[test]
    fn scenario_oversized_gene_length_is_silently_dropped() {
        let mut bytes = header(TYPE_MIGRATE_RULE).to_vec();
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.push(255);
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn decode_rejects_truncated_migrate_rule() {
        let bytes = vec![0x4B, 0x4F, 0x53, 0x02, 0, 0, 0, 1, 3, 1, 2];
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn decode_rejects_invalid_digit_in_migrate_rule() {
        let mut bytes = header(TYPE_MIGRATE_RULE).to_vec();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(1);
        bytes.push(10);
        bytes.extend_from_slice(&0.0f64.to_bits().to_be_bytes());
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn listener_round_trip_over_loopback() {
        let a = Listener::bind(0).unwrap();
        let b = Listener::bind(0).unwrap();
        let b_addr = ("127.0.0.1", b.local_port().unwrap());
        a.send_hello(99, b_addr).unwrap();
        let (from, msg) = b.poll(500).unwrap();
        assert_eq!(msg, Message::Hello { node_id: 99 });
        assert_eq!(from.port(), a.local_port().unwrap());
    }

    #[test]
    fn close_drops_the_socket() {
        let listener = Listener::bind(0).unwrap();
        listener.close();
    }
}
