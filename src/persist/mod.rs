//! Metadata Persistence
//!
//! Durable, versioned storage for cluster metadata. Every file is a
//! [`MetaHeader`] followed by a JSON body, optionally lz4-compressed and
//! CRC32-checksummed. Writes go to a temporary file that is renamed into
//! place, so readers never see a half-written file.

mod header;

pub use header::{MetaHeader, HEADER_SIZE, META_VERSION};

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::PersistenceConfig;
use crate::error::{Error, Result};

/// How metadata is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaOptions {
    pub compress: bool,
    pub checksum: bool,
    pub fsync: bool,
}

impl Default for MetaOptions {
    fn default() -> Self {
        Self {
            compress: false,
            checksum: true,
            fsync: true,
        }
    }
}

impl From<&PersistenceConfig> for MetaOptions {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            compress: config.compression,
            checksum: config.checksum,
            fsync: config.fsync,
        }
    }
}

/// Serialize a value into a metadata body
pub fn encode<T: Serialize>(value: &T, size_hint: usize) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(size_hint);
    serde_json::to_writer(&mut buf, value)?;
    Ok(Bytes::from(buf))
}

/// Deserialize a metadata body
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

/// Write a pre-encoded body to `path`
pub fn save(path: &Path, body: &[u8], opts: &MetaOptions) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let stored = if opts.compress {
        lz4_flex::compress_prepend_size(body)
    } else {
        body.to_vec()
    };
    let header = MetaHeader {
        compressed: opts.compress,
        checksummed: opts.checksum,
        checksum: if opts.checksum { crc32fast::hash(&stored) } else { 0 },
        body_len: stored.len() as u64,
    };

    let tmp = tmp_path(path);
    let written = write_file(&tmp, &header, &stored, opts.fsync).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::trace!("saved {} ({} bytes)", path.display(), stored.len());
    Ok(())
}

/// Encode and write a value to `path`
pub fn save_meta<T: Serialize>(path: &Path, value: &T, opts: &MetaOptions) -> Result<()> {
    let body = encode(value, 0)?;
    save(path, &body, opts)
}

/// Read the body stored at `path`, verifying header and checksum
///
/// A missing file surfaces as `Error::Io` with `ErrorKind::NotFound`.
pub fn load_body(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let header = MetaHeader::from_bytes(&raw)?;
    let stored = &raw[HEADER_SIZE..];
    if stored.len() as u64 != header.body_len {
        return Err(Error::MetaCorrupted(format!(
            "{}: body length {} does not match header {}",
            path.display(),
            stored.len(),
            header.body_len
        )));
    }
    if header.checksummed {
        let computed = crc32fast::hash(stored);
        if computed != header.checksum {
            return Err(Error::MetaCorrupted(format!(
                "{}: checksum mismatch: expected {:08x}, got {:08x}",
                path.display(),
                header.checksum,
                computed
            )));
        }
    }

    if header.compressed {
        lz4_flex::decompress_size_prepended(stored)
            .map_err(|e| Error::MetaCorrupted(format!("{}: decompression failed: {}", path.display(), e)))
    } else {
        Ok(stored.to_vec())
    }
}

/// Load and decode a value from `path`
pub fn load_meta<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = load_body(path)?;
    decode(&body).map_err(|e| Error::MetaCorrupted(format!("{}: {}", path.display(), e)))
}

fn write_file(path: &Path, header: &MetaHeader, stored: &[u8], fsync: bool) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&header.to_bytes())?;
    file.write_all(stored)?;
    if fsync {
        file.sync_all()?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        version: u64,
        names: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            version: 42,
            names: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn test_save_and_load_compressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");
        let opts = MetaOptions {
            compress: true,
            checksum: true,
            fsync: false,
        };

        save_meta(&path, &sample(), &opts).unwrap();
        let loaded: Sample = load_meta(&path).unwrap();
        assert_eq!(loaded, sample());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = load_meta::<Sample>(&dir.path().join("absent")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");
        save_meta(&path, &sample(), &MetaOptions::default()).unwrap();

        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 2;
        raw[last] ^= 0xff;
        fs::write(&path, raw).unwrap();

        let err = load_meta::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::MetaCorrupted(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_truncated_body_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");
        save_meta(&path, &sample(), &MetaOptions::default()).unwrap();

        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() - 3]).unwrap();
        assert!(matches!(
            load_body(&path),
            Err(Error::MetaCorrupted(_))
        ));
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        assert!(save_meta(&path, &sample(), &MetaOptions::default()).is_err());
        assert!(!tmp_path(&path).exists());

        // the temp name itself is taken by a directory, so creating it fails
        let blocked = dir.path().join("blocked");
        std::fs::create_dir_all(tmp_path(&blocked).join("occupied")).unwrap();
        assert!(save_meta(&blocked, &sample(), &MetaOptions::default()).is_err());
        assert!(!blocked.exists());
    }

    #[test]
    fn test_saved_body_is_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");
        let body = encode(&sample(), 64).unwrap();
        save(&path, &body, &MetaOptions::default()).unwrap();
        assert_eq!(load_body(&path).unwrap(), body.to_vec());
    }
}
