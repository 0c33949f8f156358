//! Opaque location tokens ("bookmarks")
//!
//! A token can be resolved back into a path even after the file has been
//! renamed or moved. Its byte layout belongs to the [`TokenService`] that
//! created it; the monitor only stores and hands it back.

use crate::error::TokenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Serializable location token
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationToken(Vec<u8>);

impl LocationToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for LocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationToken({} bytes)", self.0.len())
    }
}

/// Result of resolving a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    /// Where the file currently lives
    pub path: PathBuf,
    /// The token no longer describes this location and should be recreated
    pub is_stale: bool,
}

/// Creates and resolves location tokens
pub trait TokenService: Send + Sync {
    fn resolve(&self, token: &LocationToken) -> Result<ResolvedToken, TokenError>;

    fn create_token(&self, path: &Path) -> Result<LocationToken, TokenError>;
}

/// Current layout version of [`InodePayload`]
const PAYLOAD_VERSION: u8 = 1;

/// Token payload: file identity plus last known location
#[derive(Debug, Serialize, Deserialize)]
struct InodePayload {
    version: u8,
    dev: u64,
    ino: u64,
    path: PathBuf,
}

/// Token service keyed on device and inode
///
/// Resolution first checks the recorded path. If another file (or nothing)
/// lives there now, the nearest existing ancestor directory is searched up
/// to `search_depth` levels deep for the same inode; a hit is reported as
/// stale so the caller refreshes the token.
#[derive(Debug, Clone)]
pub struct InodeTokenService {
    search_depth: usize,
}

impl InodeTokenService {
    pub fn new(search_depth: usize) -> Self {
        Self {
            search_depth: search_depth.max(1),
        }
    }

    fn decode(token: &LocationToken) -> Result<InodePayload, TokenError> {
        let payload: InodePayload = bincode::deserialize(token.as_bytes())?;
        if payload.version != PAYLOAD_VERSION {
            return Err(TokenError::Other(format!(
                "unsupported token version {}",
                payload.version
            )));
        }
        Ok(payload)
    }

    /// Search near the last known location for the recorded inode
    fn search(&self, payload: &InodePayload) -> Option<PathBuf> {
        let root = payload.path.ancestors().skip(1).find(|dir| dir.is_dir())?;
        debug!(
            "Searching {} for inode {} (depth {})",
            root.display(),
            payload.ino,
            self.search_depth
        );

        WalkDir::new(root)
            .max_depth(self.search_depth)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry
                    .metadata()
                    .map(|meta| meta.dev() == payload.dev && meta.ino() == payload.ino)
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
    }
}

impl Default for InodeTokenService {
    fn default() -> Self {
        Self::new(2)
    }
}

impl TokenService for InodeTokenService {
    fn resolve(&self, token: &LocationToken) -> Result<ResolvedToken, TokenError> {
        let payload = Self::decode(token)?;

        if let Ok(meta) = fs::metadata(&payload.path) {
            if meta.dev() == payload.dev && meta.ino() == payload.ino {
                return Ok(ResolvedToken {
                    path: payload.path,
                    is_stale: false,
                });
            }
        }

        match self.search(&payload) {
            Some(path) => Ok(ResolvedToken {
                path,
                is_stale: true,
            }),
            None => Err(TokenError::NotFound {
                last_known: payload.path,
            }),
        }
    }

    fn create_token(&self, path: &Path) -> Result<LocationToken, TokenError> {
        let path = path.canonicalize()?;
        let meta = fs::metadata(&path)?;

        let payload = InodePayload {
            version: PAYLOAD_VERSION,
            dev: meta.dev(),
            ino: meta.ino(),
            path,
        };

        Ok(LocationToken(bincode::serialize(&payload)?))
    }
}
