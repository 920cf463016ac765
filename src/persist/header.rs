//! Metadata File Header
//!
//! Fixed-size header in front of every persisted metadata body.

use crate::error::{Error, Result};

/// Magic bytes at the start of each metadata file
const META_MAGIC: &[u8; 8] = b"CLMAPMET";

/// Metadata file format version
pub const META_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

const FLAG_COMPRESSED: u32 = 1 << 0;
const FLAG_CHECKSUM: u32 = 1 << 1;

/// Metadata file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaHeader {
    /// Body is lz4-compressed
    pub compressed: bool,
    /// `checksum` is meaningful
    pub checksummed: bool,
    /// CRC32 of the stored body
    pub checksum: u32,
    /// Length of the stored body in bytes
    pub body_len: u64,
}

impl MetaHeader {
    /// Serialize header to bytes
    ///
    /// Layout: magic(8) | version(4) | flags(4) | body_len(8) | checksum(4) | reserved(4)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut flags = 0u32;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.checksummed {
            flags |= FLAG_CHECKSUM;
        }

        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(META_MAGIC);
        bytes[8..12].copy_from_slice(&META_VERSION.to_le_bytes());
        bytes[12..16].copy_from_slice(&flags.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.body_len.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MetaCorrupted("header too short".into()));
        }

        if &bytes[0..8] != META_MAGIC {
            return Err(Error::MetaCorrupted("invalid magic bytes".into()));
        }

        let version = read_u32(bytes, 8);
        if version != META_VERSION {
            return Err(Error::MetaCorrupted(format!(
                "unsupported format version: {}",
                version
            )));
        }

        let flags = read_u32(bytes, 12);
        Ok(Self {
            compressed: flags & FLAG_COMPRESSED != 0,
            checksummed: flags & FLAG_CHECKSUM != 0,
            body_len: read_u64(bytes, 16),
            checksum: read_u32(bytes, 24),
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = MetaHeader {
            compressed: true,
            checksummed: false,
            checksum: 0,
            body_len: 4096,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], b"CLMAPMET");
        assert_eq!(MetaHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(
            MetaHeader::from_bytes(&[0u8; 10]),
            Err(Error::MetaCorrupted(_))
        ));

        let mut bytes = MetaHeader {
            compressed: false,
            checksummed: true,
            checksum: 7,
            body_len: 1,
        }
        .to_bytes();
        bytes[8] = 99;
        let err = MetaHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }
}
