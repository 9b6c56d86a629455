//! Snapshot stream format
//!
//! ```text
//! [u32 LE header length][bincode SnapshotHeader][payload]
//! ```
//!
//! The payload is a bincode `Vec<KvPair>`, zstd-compressed when the header's
//! compressed flag is set. Both the header and the payload carry CRC32C
//! checksums.

use crate::config::CompressionConfig;
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use strand_core::{Error, KvPair, Result};

/// Magic number for snapshot streams: "STRS"
pub const SNAPSHOT_MAGIC: u32 = 0x5354_5253;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

const MAX_HEADER_LEN: u32 = 4 * 1024;

/// Whole keyspace at one instant, plus the change number it reflects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub change_number: u64,
    pub pairs: Vec<KvPair>,
}

/// Binary header preceding every snapshot payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    magic: u32,
    version: u16,
    flags: u16,
    pub change_number: u64,
    pub entry_count: u64,
    pub payload_len: u64,
    pub payload_crc: u32,
    header_crc: u32,
}

impl SnapshotHeader {
    const FLAG_COMPRESSED: u16 = 1 << 0;

    fn new(change_number: u64, entry_count: u64, payload: &[u8], compressed: bool) -> Self {
        let mut header = Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            flags: if compressed { Self::FLAG_COMPRESSED } else { 0 },
            change_number,
            entry_count,
            payload_len: payload.len() as u64,
            payload_crc: crc32c(payload),
            header_crc: 0,
        };
        header.header_crc = header.calculate_crc();
        header
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & Self::FLAG_COMPRESSED != 0
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    fn calculate_crc(&self) -> u32 {
        let mut temp = *self;
        temp.header_crc = 0;
        match bincode::serialize(&temp) {
            Ok(bytes) => crc32c(&bytes),
            Err(_) => 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(corrupt(format!(
                "invalid magic number: expected {SNAPSHOT_MAGIC:08x}, got {:08x}",
                self.magic
            )));
        }
        if self.version > SNAPSHOT_VERSION {
            return Err(corrupt(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let expected = self.calculate_crc();
        if self.header_crc != expected {
            return Err(corrupt(format!(
                "header CRC mismatch: expected {expected:08x}, got {:08x}",
                self.header_crc
            )));
        }
        Ok(())
    }
}

fn corrupt(message: String) -> Error {
    Error::storage("decode snapshot", message)
}

/// Serialize `snapshot` into a self-contained byte stream
pub fn encode(snapshot: &Snapshot, compression: &CompressionConfig) -> Result<Vec<u8>> {
    let raw = bincode::serialize(&snapshot.pairs)
        .map_err(|e| Error::serialization("encode", "snapshot payload", e))?;

    let compress = compression.enabled && raw.len() >= compression.min_size;
    let payload = if compress {
        zstd::stream::encode_all(raw.as_slice(), compression.level)
            .map_err(|e| Error::storage_with_source("compress snapshot", "zstd failed", e))?
    } else {
        raw
    };

    let header = SnapshotHeader::new(
        snapshot.change_number,
        snapshot.pairs.len() as u64,
        &payload,
        compress,
    );
    let header_bytes = bincode::serialize(&header)
        .map_err(|e| Error::serialization("encode", "snapshot header", e))?;

    let mut out = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    out.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
    out.write_all(&header_bytes)?;
    out.write_all(&payload)?;

    tracing::debug!(
        entries = snapshot.pairs.len(),
        change_number = snapshot.change_number,
        bytes = out.len(),
        compressed = compress,
        "Encoded snapshot"
    );
    Ok(out)
}

/// Read and validate only the header of a snapshot stream
pub fn read_header(reader: &mut dyn Read) -> Result<SnapshotHeader> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::storage_with_source("decode snapshot", "truncated header length", e))?;
    let len = u32::from_le_bytes(len_bytes);
    if len == 0 || len > MAX_HEADER_LEN {
        return Err(corrupt(format!("implausible header length {len}")));
    }

    let mut header_bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut header_bytes)
        .map_err(|e| Error::storage_with_source("decode snapshot", "truncated header", e))?;

    let header: SnapshotHeader = bincode::deserialize(&header_bytes)
        .map_err(|e| Error::serialization("decode", "snapshot header", e))?;
    header.validate()?;
    Ok(header)
}

/// Decode a full snapshot, verifying every checksum
pub fn decode(reader: &mut dyn Read) -> Result<Snapshot> {
    let header = read_header(reader)?;

    let mut payload = Vec::with_capacity(header.payload_len.min(64 * 1024 * 1024) as usize);
    reader
        .take(header.payload_len)
        .read_to_end(&mut payload)
        .map_err(|e| Error::storage_with_source("decode snapshot", "failed to read payload", e))?;

    if payload.len() as u64 != header.payload_len {
        return Err(corrupt(format!(
            "truncated payload: expected {} bytes, got {}",
            header.payload_len,
            payload.len()
        )));
    }

    let actual = crc32c(&payload);
    if actual != header.payload_crc {
        return Err(corrupt(format!(
            "payload CRC mismatch: expected {:08x}, got {actual:08x}",
            header.payload_crc
        )));
    }

    let raw = if header.is_compressed() {
        zstd::stream::decode_all(payload.as_slice())
            .map_err(|e| Error::storage_with_source("decompress snapshot", "zstd failed", e))?
    } else {
        payload
    };

    let pairs: Vec<KvPair> = bincode::deserialize(&raw)
        .map_err(|e| Error::serialization("decode", "snapshot payload", e))?;

    if pairs.len() as u64 != header.entry_count {
        return Err(corrupt(format!(
            "entry count mismatch: header says {}, payload has {}",
            header.entry_count,
            pairs.len()
        )));
    }

    Ok(Snapshot {
        change_number: header.change_number,
        pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(n: usize) -> Snapshot {
        Snapshot {
            change_number: 42,
            pairs: (0..n)
                .map(|i| KvPair::new(format!("key-{i:04}"), vec![b'x'; 64]))
                .collect(),
        }
    }

    #[test]
    fn test_compressed_payload_is_smaller() {
        let snapshot = sample(500);
        let compression = CompressionConfig {
            enabled: true,
            level: 3,
            min_size: 16,
        };
        let plain = encode(&snapshot, &CompressionConfig { enabled: false, ..compression.clone() }).unwrap();
        let packed = encode(&snapshot, &compression).unwrap();
        assert!(packed.len() < plain.len());

        let header = read_header(&mut Cursor::new(&packed)).unwrap();
        assert!(header.is_compressed());
        assert_eq!(header.entry_count, 500);
        assert_eq!(decode(&mut Cursor::new(packed)).unwrap(), snapshot);
    }

    #[test]
    fn test_small_payload_stays_raw() {
        let snapshot = sample(1);
        let bytes = encode(&snapshot, &CompressionConfig::default()).unwrap();
        let header = read_header(&mut Cursor::new(&bytes)).unwrap();
        assert!(!header.is_compressed());
        assert_eq!(header.change_number, 42);
    }

    #[test]
    fn test_flipped_payload_byte_is_detected() {
        let mut bytes = encode(&sample(3), &CompressionConfig::default()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let err = decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("payload CRC mismatch"), "{err}");
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let bytes = encode(&sample(3), &CompressionConfig::default()).unwrap();
        let truncated = &bytes[..bytes.len() - 5];
        assert!(decode(&mut Cursor::new(truncated)).is_err());
        assert!(decode(&mut Cursor::new(Vec::<u8>::new())).is_err());
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let mut bytes = 8u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"notaheader");
        assert!(read_header(&mut Cursor::new(bytes)).is_err());
    }
}
