//! The genome log (component D): an append-only, tamper-evident binary
//! journal of everything a node does.
//!
//! Each record is a fixed 512-byte block chained by the SHA-256 hash of the
//! previous block's full on-disk image, and authenticated by an
//! HMAC-SHA256 keyed tag over the block's own fields. Blocks are written
//! one at a time with a single `write_all` so a crash mid-append leaves at
//! worst a truncated tail, never a half-written block spliced into the
//! middle of the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::codec::{self};
use crate::error::{LogError, VerifyStatus};

/// On-disk block size in bytes.
pub const BLOCK_SIZE: usize = 512;
const INDEX_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 8;
const PREV_HASH_OFFSET: usize = 16;
const HMAC_OFFSET: usize = 48;
const EVENT_TYPE_OFFSET: usize = 80;
const EVENT_TYPE_LEN: usize = 32;
const PAYLOAD_OFFSET: usize = 112;
pub const PAYLOAD_LEN: usize = 400;
const MAX_KEY_LEN: usize = 64;

type HmacSha256 = Hmac<Sha256>;

/// A single decoded block of the genome log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp_ms: u64,
    pub prev_hash: [u8; 32],
    pub hmac: [u8; 32],
    pub event_type: String,
    pub payload: String,
}

impl Block {
    fn image(
        index: u64,
        timestamp_ms: u64,
        prev_hash: &[u8; 32],
        hmac: &[u8; 32],
        event_type: &str,
        payload: &str,
    ) -> [u8; BLOCK_SIZE] {
        let mut image = [0u8; BLOCK_SIZE];
        image[INDEX_OFFSET..INDEX_OFFSET + 8].copy_from_slice(&index.to_be_bytes());
        image[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&timestamp_ms.to_be_bytes());
        image[PREV_HASH_OFFSET..PREV_HASH_OFFSET + 32].copy_from_slice(prev_hash);
        image[HMAC_OFFSET..HMAC_OFFSET + 32].copy_from_slice(hmac);
        write_padded(&mut image[EVENT_TYPE_OFFSET..EVENT_TYPE_OFFSET + EVENT_TYPE_LEN], event_type.as_bytes());
        write_padded(&mut image[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN], payload.as_bytes());
        image
    }

    fn to_image(&self) -> [u8; BLOCK_SIZE] {
        Self::image(
            self.index,
            self.timestamp_ms,
            &self.prev_hash,
            &self.hmac,
            &self.event_type,
            &self.payload,
        )
    }

    fn mac_input(index: u64, timestamp_ms: u64, prev_hash: &[u8; 32], event_type: &str, payload: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 32 + EVENT_TYPE_LEN + PAYLOAD_LEN);
        buf.extend_from_slice(&index.to_be_bytes());
        buf.extend_from_slice(&timestamp_ms.to_be_bytes());
        buf.extend_from_slice(prev_hash);
        let mut type_field = [0u8; EVENT_TYPE_LEN];
        write_padded(&mut type_field, event_type.as_bytes());
        buf.extend_from_slice(&type_field);
        let mut payload_field = [0u8; PAYLOAD_LEN];
        write_padded(&mut payload_field, payload.as_bytes());
        buf.extend_from_slice(&payload_field);
        buf
    }

    fn from_image(raw: &[u8; BLOCK_SIZE]) -> Self {
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&raw[INDEX_OFFSET..INDEX_OFFSET + 8]);
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&raw[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]);
        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&raw[PREV_HASH_OFFSET..PREV_HASH_OFFSET + 32]);
        let mut hmac = [0u8; 32];
        hmac.copy_from_slice(&raw[HMAC_OFFSET..HMAC_OFFSET + 32]);
        let event_type = read_padded(&raw[EVENT_TYPE_OFFSET..EVENT_TYPE_OFFSET + EVENT_TYPE_LEN]);
        let payload = read_padded(&raw[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN]);
        Self {
            index: u64::from_be_bytes(index_bytes),
            timestamp_ms: u64::from_be_bytes(ts_bytes),
            prev_hash,
            hmac,
            event_type,
            payload,
        }
    }
}

fn write_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

fn read_padded(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn hash_image(image: &[u8; BLOCK_SIZE]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(image);
    hasher.finalize().into()
}

fn compute_hmac(key: &[u8], mac_input: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(mac_input);
    mac.finalize().into_bytes().into()
}

/// An open, append-only genome log.
#[derive(Debug)]
pub struct GenomeLog {
    file: File,
    key: Vec<u8>,
    next_index: u64,
    last_image: [u8; BLOCK_SIZE],
}

impl GenomeLog {
    /// Opens (creating if absent) the log at `path`, keyed by `key`.
    ///
    /// Every existing block is re-verified on open. A trailing partial
    /// block (length not a multiple of 512) is truncated off rather than
    /// treated as corruption, on the theory that it is an interrupted
    /// append, not tampering; any full block that fails its HMAC or chain
    /// check is reported as `Corrupt`.
    pub fn open(path: &Path, key: &[u8]) -> Result<Self, LogError> {
        if key.len() > MAX_KEY_LEN {
            return Err(LogError::KeyTooLong(key.len()));
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let whole_blocks = len / BLOCK_SIZE as u64;
        if whole_blocks * BLOCK_SIZE as u64 != len {
            file.set_len(whole_blocks * BLOCK_SIZE as u64)?;
        }

        let mut prev_image = [0u8; BLOCK_SIZE];
        let mut expected_prev_hash = [0u8; 32];
        file.seek(SeekFrom::Start(0))?;
        for expected_index in 0..whole_blocks {
            let mut raw = [0u8; BLOCK_SIZE];
            file.read_exact(&mut raw)?;
            let block = Block::from_image(&raw);
            if block.index != expected_index {
                return Err(LogError::Corrupt {
                    index: expected_index,
                    reason: "index mismatch".to_string(),
                });
            }
            if block.prev_hash != expected_prev_hash {
                return Err(LogError::Corrupt {
                    index: expected_index,
                    reason: "chain hash mismatch".to_string(),
                });
            }
            let mac_input = Block::mac_input(
                block.index,
                block.timestamp_ms,
                &block.prev_hash,
                &block.event_type,
                &block.payload,
            );
            let expected_hmac = compute_hmac(key, &mac_input);
            if block.hmac != expected_hmac {
                return Err(LogError::Corrupt {
                    index: expected_index,
                    reason: "hmac mismatch".to_string(),
                });
            }
            expected_prev_hash = hash_image(&raw);
            prev_image = raw;
        }

        Ok(Self {
            file,
            key: key.to_vec(),
            next_index: whole_blocks,
            last_image: prev_image,
        })
    }

    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Appends one block recording `event_type`/`payload` (ASCII digits,
    /// each field truncated to its fixed width). Writes and flushes a
    /// single 512-byte image.
    pub fn append(&mut self, event_type: &str, payload: &str, timestamp_ms: u64) -> Result<Block, LogError> {
        if event_type.len() > EVENT_TYPE_LEN {
            return Err(LogError::InvalidArgument(format!(
                "event_type longer than {EVENT_TYPE_LEN} bytes"
            )));
        }
        if payload.len() > PAYLOAD_LEN {
            return Err(LogError::InvalidArgument(format!(
                "payload longer than {PAYLOAD_LEN} bytes"
            )));
        }
        if !event_type.is_ascii() {
            return Err(LogError::InvalidArgument("event_type must be ASCII".to_string()));
        }
        if !payload.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LogError::InvalidArgument(
                "payload must contain only ASCII decimal digits".to_string(),
            ));
        }
        let index = self.next_index;
        let prev_hash = if index == 0 {
            [0u8; 32]
        } else {
            hash_image(&self.last_image)
        };
        let mac_input = Block::mac_input(index, timestamp_ms, &prev_hash, event_type, payload);
        let hmac = compute_hmac(&self.key, &mac_input);
        let image = Block::image(index, timestamp_ms, &prev_hash, &hmac, event_type, payload);

        self.file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        self.file.write_all(&image)?;
        self.file.flush()?;

        self.last_image = image;
        self.next_index += 1;

        Ok(Block::from_image(&image))
    }
}

/// Verifies every block in the log at `path` without holding it open for
/// writing. Returns `Missing` if the file doesn't exist, `Corrupt` at the
/// first chain/HMAC/index failure (including a non-multiple-of-512
/// length), and `Ok` otherwise, including for an empty file.
#[must_use]
pub fn verify(path: &Path, key: &[u8]) -> VerifyStatus {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return VerifyStatus::Missing,
    };
    let len = match file.metadata() {
        Ok(m) => m.len(),
        Err(_) => return VerifyStatus::Missing,
    };
    if len % BLOCK_SIZE as u64 != 0 {
        return VerifyStatus::Corrupt;
    }
    let whole_blocks = len / BLOCK_SIZE as u64;
    let mut expected_prev_hash = [0u8; 32];
    for expected_index in 0..whole_blocks {
        let mut raw = [0u8; BLOCK_SIZE];
        if file.read_exact(&mut raw).is_err() {
            return VerifyStatus::Corrupt;
        }
        let block = Block::from_image(&raw);
        if block.index != expected_index || block.prev_hash != expected_prev_hash {
            return VerifyStatus::Corrupt;
        }
        let mac_input = Block::mac_input(
            block.index,
            block.timestamp_ms,
            &block.prev_hash,
            &block.event_type,
            &block.payload,
        );
        if block.hmac != compute_hmac(key, &mac_input) {
            return VerifyStatus::Corrupt;
        }
        expected_prev_hash = hash_image(&raw);
    }
    VerifyStatus::Ok
}

/// Scans every block in the log, calling `callback` for each whose
/// `event_type` matches `filter` (or every block, if `filter` is `None`).
/// Stops at the first integrity failure and returns what was read so far
/// as an error.
pub fn scan<F: FnMut(&Block)>(path: &Path, filter: Option<&str>, mut callback: F) -> Result<(), LogError> {
    let mut file = File::open(path).map_err(|_| LogError::Missing)?;
    let len = file.metadata()?.len();
    if len % BLOCK_SIZE as u64 != 0 {
        return Err(LogError::Truncated);
    }
    let whole_blocks = len / BLOCK_SIZE as u64;
    for expected_index in 0..whole_blocks {
        let mut raw = [0u8; BLOCK_SIZE];
        file.read_exact(&mut raw)?;
        let block = Block::from_image(&raw);
        if block.index != expected_index {
            return Err(LogError::Corrupt {
                index: expected_index,
                reason: "index mismatch".to_string(),
            });
        }
        let matches = match filter {
            Some(wanted) => wanted == block.event_type,
            None => true,
        };
        if matches {
            callback(&block);
        }
    }
    Ok(())
}

/// Encodes arbitrary bytes as a digit payload for [`GenomeLog::append`],
/// bounded by the fixed 400-byte payload field.
pub fn encode_payload(bytes: &[u8]) -> Result<String, LogError> {
    let digits = codec::encode(bytes, PAYLOAD_LEN).map_err(|e| LogError::InvalidArgument(e.to_string()))?;
    Ok(digits.into_iter().map(|d| (b'0' + d) as char).collect())
}
