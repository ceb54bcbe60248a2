//! Remote object stores.
//!
//! The queue only talks to a remote through [`RemoteStore`]. The shipped
//! implementation is a directory laid out like the local object store, which
//! is enough for mounted shares and for tests.

use eyre::{bail, eyre, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::store::object_path;
use crate::Transfer;

pub trait RemoteStore: Send + Sync {
    /// Oids from `batch` that the remote already holds.
    fn batch_exists(&self, batch: &[Transfer]) -> Result<HashSet<String>>;

    /// Send one object's bytes to the remote.
    fn upload(&self, transfer: &Transfer) -> Result<()>;

    /// Human-readable location, used in logs and summaries.
    fn describe(&self) -> String;
}

/// Remote store backed by a directory.
#[derive(Clone, Debug)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn has_object(&self, oid: &str, size: u64) -> bool {
        match fs::metadata(object_path(&self.root, oid)) {
            // Bare oids carry no size, so any length counts.
            Ok(meta) => meta.is_file() && (size == 0 || meta.len() == size),
            Err(_) => false,
        }
    }
}

impl RemoteStore for DirRemote {
    fn batch_exists(&self, batch: &[Transfer]) -> Result<HashSet<String>> {
        if !self.root.is_dir() {
            bail!("remote store {} is not a directory", self.root.display());
        }
        Ok(batch
            .iter()
            .filter(|t| self.has_object(&t.oid, t.size))
            .map(|t| t.oid.clone())
            .collect())
    }

    fn upload(&self, transfer: &Transfer) -> Result<()> {
        let dest = object_path(&self.root, &transfer.oid);
        let parent = dest
            .parent()
            .ok_or_else(|| eyre!("object path {} has no parent", dest.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("creating remote directory {}", parent.display()))?;

        let tmp = dest.with_extension("part");
        let written = fs::copy(&transfer.path, &tmp).with_context(|| {
            format!(
                "copying {} to {}",
                transfer.path.display(),
                tmp.display()
            )
        })?;
        if written != transfer.size {
            let _ = fs::remove_file(&tmp);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("wrote {written} bytes, expected {}", transfer.size),
            ))
            .with_context(|| format!("uploading {}", transfer.oid));
        }
        fs::rename(&tmp, &dest)
            .with_context(|| format!("finalizing {}", dest.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Where a push is going, as named on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Name as given by the user (a configured remote name or a location).
    pub name: String,
    pub root: PathBuf,
}

impl RemoteEndpoint {
    /// Resolve `input` as a configured remote name, a `file://` URL, or an
    /// existing directory, in that order.
    pub fn parse(input: &str, config: &Config) -> Result<Self> {
        if input.is_empty() {
            bail!("remote name is empty");
        }
        if let Some(location) = config.remote(input) {
            return Ok(Self {
                name: input.to_string(),
                root: location_to_path(location),
            });
        }
        if input.starts_with("file://") {
            return Ok(Self {
                name: input.to_string(),
                root: location_to_path(input),
            });
        }
        let path = Path::new(input);
        if path.is_dir() {
            return Ok(Self {
                name: input.to_string(),
                root: path.to_path_buf(),
            });
        }
        bail!("Invalid remote name {input:?}")
    }

    pub fn store(&self) -> DirRemote {
        DirRemote::new(self.root.clone())
    }
}

fn location_to_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}
