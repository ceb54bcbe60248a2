//! Local content-addressed object store.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::errors::ResolveError;
use crate::pointer::{Pointer, MAX_POINTER_SIZE};
use crate::Transfer;

/// What the orchestrator needs from local storage.
pub trait LocalStore: Send + Sync {
    /// True when the object is stored locally with exactly `size` bytes.
    fn exists(&self, oid: &str, size: u64) -> bool;

    /// Turn a pointer into a transfer descriptor for its local bytes.
    fn resolve(&self, pointer: &Pointer) -> Result<Transfer, ResolveError>;
}

/// `<root>/<oid[0..2]>/<oid[2..4]>/<oid>`
pub fn object_path(root: &Path, oid: &str) -> PathBuf {
    if oid.len() < 4 {
        return root.join(oid);
    }
    root.join(&oid[0..2]).join(&oid[2..4]).join(oid)
}

/// Object store kept under a repository's git directory, with the working
/// tree as a fallback source of content.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    objects_dir: PathBuf,
    work_tree: PathBuf,
}

impl FsObjectStore {
    pub fn new(objects_dir: impl Into<PathBuf>, work_tree: impl Into<PathBuf>) -> Self {
        Self {
            objects_dir: objects_dir.into(),
            work_tree: work_tree.into(),
        }
    }

    pub fn for_repo(git_dir: &Path, work_tree: &Path) -> Self {
        Self::new(git_dir.join("lfs").join("objects"), work_tree)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn object_path(&self, oid: &str) -> PathBuf {
        object_path(&self.objects_dir, oid)
    }

    fn transfer_for(&self, pointer: &Pointer, path: PathBuf) -> Result<Transfer, ResolveError> {
        let size = fs::metadata(&path)
            .map_err(|source| ResolveError::Io {
                oid: pointer.oid.clone(),
                source,
            })?
            .len();
        Ok(Transfer {
            name: pointer.name.clone(),
            path,
            oid: pointer.oid.clone(),
            size,
        })
    }

    /// Populate the object store from the working-tree copy of `pointer`.
    fn ensure_from_work_tree(&self, pointer: &Pointer) -> Result<PathBuf, ResolveError> {
        let missing = || ResolveError::Missing {
            oid: pointer.oid.clone(),
            name: pointer.name.clone(),
        };
        if pointer.name.is_empty() {
            return Err(missing());
        }
        let source = self.work_tree.join(&pointer.name);
        if !source.is_file() {
            return Err(missing());
        }

        let io_err = |source: io::Error| ResolveError::Io {
            oid: pointer.oid.clone(),
            source,
        };
        let actual = clean_oid(&source).map_err(io_err)?;
        if actual != pointer.oid {
            return Err(ResolveError::PointerMismatch {
                expected: pointer.oid.clone(),
                tried: pointer.name.clone(),
                actual,
                objects_dir: self.objects_dir.clone(),
            });
        }

        // A pointer file in the working tree names the right oid but holds
        // none of the content.
        let meta = fs::metadata(&source).map_err(io_err)?;
        if meta.len() as usize <= MAX_POINTER_SIZE && is_pointer_file(&source) {
            return Err(missing());
        }

        let dest = self.object_path(&pointer.oid);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::copy(&source, &dest).map_err(io_err)?;
        log::debug!(
            "stored {} from working tree file {}",
            pointer.oid,
            source.display()
        );
        Ok(dest)
    }
}

impl LocalStore for FsObjectStore {
    fn exists(&self, oid: &str, size: u64) -> bool {
        match fs::metadata(self.object_path(oid)) {
            Ok(meta) => meta.is_file() && meta.len() == size,
            Err(_) => false,
        }
    }

    fn resolve(&self, pointer: &Pointer) -> Result<Transfer, ResolveError> {
        let path = self.object_path(&pointer.oid);
        if path.is_file() {
            return self.transfer_for(pointer, path);
        }
        let stored = self.ensure_from_work_tree(pointer)?;
        self.transfer_for(pointer, stored)
    }
}

fn is_pointer_file(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|text| Pointer::parse(&text).is_ok())
        .unwrap_or(false)
}

/// Content id of a working-tree file: the oid it names if it is pointer
/// text, otherwise the SHA-256 of its bytes.
pub fn clean_oid(path: &Path) -> io::Result<String> {
    let meta = fs::metadata(path)?;
    if meta.len() as usize <= MAX_POINTER_SIZE {
        let bytes = fs::read(path)?;
        if let Ok(text) = std::str::from_utf8(&bytes) {
            if let Ok(pointer) = Pointer::parse(text) {
                return Ok(pointer.oid);
            }
        }
        return Ok(hash_bytes(&bytes));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
