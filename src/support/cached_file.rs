//! URL-backed local file cache
//!
//! `CachedFile::get` yields a local path whose content is refreshed from
//! the URL when the file is missing or its recorded last retrieval is more
//! than two days old. Retrieval times live in a JSON registry next to the
//! cached files, keyed by local file name. A failed retrieval leaves any
//! existing file (and its timestamp) in place: stale data beats none.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const REGISTRY_FILE: &str = "retrieval-times.json";

fn max_age() -> Duration {
    Duration::days(2)
}

/// Fetches bytes for a URL. Injected so nothing here touches the network
/// in tests.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, url: &str) -> Result<Vec<u8>>;
}

/// Production retriever over HTTP(S).
pub struct HttpRetriever;

impl Retriever for HttpRetriever {
    fn retrieve(&self, url: &str) -> Result<Vec<u8>> {
        let response = reqwest::blocking::get(url).map_err(|e| Error::Retrieval {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Retrieval {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        let bytes = response.bytes().map_err(|e| Error::Retrieval {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

/// A local copy of a remote file, refreshed at most every two days.
pub struct CachedFile {
    local_path: PathBuf,
    ok: bool,
}

impl CachedFile {
    pub fn get(url: &str, cache_dir: &Path, retriever: &dyn Retriever) -> CachedFile {
        let filename = local_filename(url);
        let local_path = cache_dir.join(&filename);

        if is_fresh(cache_dir, &filename, &local_path) {
            debug!(url, path = %local_path.display(), "cache is fresh");
            return CachedFile {
                local_path,
                ok: true,
            };
        }

        match Self::refresh(url, cache_dir, &filename, &local_path, retriever) {
            Ok(()) => CachedFile {
                local_path,
                ok: true,
            },
            Err(e) => {
                warn!(url, error = %e, "retrieval failed");
                // a stale copy is still usable; the timestamp stays put
                let ok = local_path.exists();
                CachedFile { local_path, ok }
            }
        }
    }

    fn refresh(
        url: &str,
        cache_dir: &Path,
        filename: &str,
        local_path: &Path,
        retriever: &dyn Retriever,
    ) -> Result<()> {
        fs::create_dir_all(cache_dir)?;
        let bytes = retriever.retrieve(url)?;

        let temp_path = local_path.with_extension("part");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, local_path)?;

        let mut registry = load_registry(cache_dir);
        registry.insert(filename.to_string(), Utc::now());
        save_registry(cache_dir, &registry);

        debug!(url, path = %local_path.display(), "retrieved");
        Ok(())
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

fn is_fresh(cache_dir: &Path, filename: &str, local_path: &Path) -> bool {
    if !local_path.exists() {
        debug!(path = %local_path.display(), "local file does not exist");
        return false;
    }
    let registry = load_registry(cache_dir);
    match registry.get(filename) {
        Some(last) => Utc::now().signed_duration_since(*last) < max_age(),
        None => false,
    }
}

/// Hash the URL for the local name, keeping any extension for the
/// benefit of consumers that sniff by suffix.
fn local_filename(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().take(12).map(|b| format!("{:02x}", b)).collect();
    let extension = url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("{}.{}", hex, ext),
        None => hex,
    }
}

fn load_registry(cache_dir: &Path) -> HashMap<String, DateTime<Utc>> {
    let path = cache_dir.join(REGISTRY_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn save_registry(cache_dir: &Path, registry: &HashMap<String, DateTime<Utc>>) {
    let path = cache_dir.join(REGISTRY_FILE);
    match serde_json::to_string_pretty(registry) {
        Ok(text) => {
            if let Err(e) = fs::write(&path, text) {
                warn!(path = %path.display(), error = %e, "failed to save retrieval registry");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode retrieval registry"),
    }
}
