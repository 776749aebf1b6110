//! Content fingerprints.
//!
//! A fingerprint is the BLAKE3 digest of a file's bytes. Files are streamed
//! through the hasher in fixed-size chunks, so memory use is bounded by the
//! chunk size regardless of how large the file is.

use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Default read chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

pub const FINGERPRINT_LEN: usize = 32;

/// 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Fingerprint(bytes)
    }

    /// Builds a fingerprint from a stored BLOB, rejecting anything that is not
    /// exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        Some(Fingerprint(array))
    }

    /// Fingerprint of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Fingerprint(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(blake3::Hash::from(self.0).to_hex().as_str())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        blake3::Hash::from_hex(s)
            .map(|hash| Fingerprint(*hash.as_bytes()))
            .map_err(|e| Error::config(format!("invalid fingerprint '{}': {}", s, e)))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Size and fingerprint of one file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDigest {
    pub size_bytes: u64,
    pub fingerprint: Fingerprint,
}

/// Streams files through BLAKE3 in `chunk_size` pieces.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    chunk_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Fingerprinter {
    pub fn new(chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::config("fingerprint chunk size must be greater than zero"));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hash the file at `path`. Any open or read failure discards the partial
    /// digest and returns the IO error.
    pub fn fingerprint_file(&self, path: &Path) -> io::Result<FileDigest> {
        let file = File::open(path)?;
        self.fingerprint_reader(file)
    }

    pub fn fingerprint_reader<R: Read>(&self, mut reader: R) -> io::Result<FileDigest> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut size_bytes = 0u64;

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
            size_bytes += bytes_read as u64;
        }

        Ok(FileDigest {
            size_bytes,
            fingerprint: Fingerprint(*hasher.finalize().as_bytes()),
        })
    }
}
