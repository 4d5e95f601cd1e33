//! Append-only record of published URLs, keyed by the SHA-256 of the
//! normalised URL. The whole array is rewritten after every append; rows
//! that do not parse are kept on disk untouched.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use reqwest::Url;
use sha2::{Digest, Sha256};
use thiserror::Error;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::model::LedgerEntry;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("url hash {url_hash} is already in the ledger")]
    Conflict { url_hash: String },
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trim, then canonicalise through the URL parser when possible
/// (lowercased scheme and host, default port dropped, fragment removed).
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Lowercase hex SHA-256 of the normalised URL.
pub fn url_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(normalize_url(raw).as_bytes()))
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// Every stored row as read, written back verbatim.
    rows: Vec<Value>,
    entries: Vec<LedgerEntry>,
    hashes: HashSet<String>,
}

impl Ledger {
    /// Read the ledger at `path`. A missing file, unreadable content or a
    /// non-array document is an empty ledger, never an error.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let rows = read_rows(&path).await;
        let mut hashes = HashSet::with_capacity(rows.len());
        let mut entries = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            match serde_json::from_value::<LedgerEntry>(row.clone()) {
                Ok(entry) => {
                    if hashes.insert(entry.url_hash.clone()) {
                        entries.push(entry);
                    } else {
                        warn!(url_hash = %entry.url_hash, index = idx, "duplicate ledger entry");
                    }
                }
                Err(err) => warn!(?err, index = idx, "unreadable ledger entry kept as is"),
            }
        }
        debug!(path = %path.display(), rows = rows.len(), entries = entries.len(), "ledger loaded");
        Self {
            path,
            rows,
            entries,
            hashes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in append order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn contains(&self, url_hash: &str) -> bool {
        self.hashes.contains(url_hash)
    }

    pub fn hashes(&self) -> &HashSet<String> {
        &self.hashes
    }

    /// Append and persist. Fails with `Conflict` if the hash is present;
    /// on a write failure the in-memory state is left as it was.
    pub async fn append(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        if self.contains(&entry.url_hash) {
            return Err(LedgerError::Conflict {
                url_hash: entry.url_hash,
            });
        }
        self.rows.push(serde_json::to_value(&entry)?);
        if let Err(err) = self.persist().await {
            self.rows.pop();
            debug!(url_hash = %entry.url_hash, "rolled back unpersisted ledger entry");
            return Err(err);
        }
        self.hashes.insert(entry.url_hash.clone());
        self.entries.push(entry);
        Ok(())
    }

    async fn persist(&self) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut body = serde_json::to_string_pretty(&self.rows)?;
        body.push('\n');
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

async fn read_rows(path: &Path) -> Vec<Value> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(?err, path = %path.display(), "failed to read ledger; treating as empty");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(rows)) => rows,
        Ok(_) => {
            warn!(path = %path.display(), "ledger is not a JSON array; treating as empty");
            Vec::new()
        }
        Err(err) => {
            warn!(?err, path = %path.display(), "ledger is not valid JSON; treating as empty");
            Vec::new()
        }
    }
}
