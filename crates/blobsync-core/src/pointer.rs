//! Blob pointers and their on-disk text encoding.
//!
//! A pointer is what version-controlled history stores in place of a large
//! blob: the blob's content id, its size, and (once scanned) the working-tree
//! path it was found at.

use eyre::{bail, eyre, Result};
use std::fmt;

pub const POINTER_VERSION: &str = "https://git-lfs.github.com/spec/v1";
const LEGACY_VERSION: &str = "https://hawser.github.com/spec/v1";
const OID_TYPE: &str = "sha256";

/// Pointer text is always tiny; anything larger is real content.
pub const MAX_POINTER_SIZE: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub oid: String,
    pub size: u64,
    pub name: String,
}

impl Pointer {
    pub fn new(oid: impl Into<String>, size: u64, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            size,
            name: name.into(),
        }
    }

    /// Pointer for a bare content id supplied on the command line. Size and
    /// name are unknown.
    pub fn from_oid(oid: impl Into<String>) -> Self {
        Self::new(oid, 0, "")
    }

    /// Parse pointer file text.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > MAX_POINTER_SIZE {
            bail!("pointer text exceeds {MAX_POINTER_SIZE} bytes");
        }

        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let first = lines.next().ok_or_else(|| eyre!("empty pointer text"))?;
        let (key, version) = split_line(first)?;
        if key != "version" {
            bail!("pointer must start with a version line, found {key:?}");
        }
        if version != POINTER_VERSION && version != LEGACY_VERSION {
            bail!("unsupported pointer version {version:?}");
        }

        let mut oid = None;
        let mut size = None;
        let mut last_key: Option<&str> = None;
        for line in lines {
            let (key, value) = split_line(line)?;
            if let Some(prev) = last_key {
                if key <= prev {
                    bail!("pointer keys out of order: {key:?} after {prev:?}");
                }
            }
            last_key = Some(key);

            match key {
                "oid" => {
                    let (kind, hex) = value
                        .split_once(':')
                        .ok_or_else(|| eyre!("malformed oid {value:?}"))?;
                    if kind != OID_TYPE {
                        bail!("unsupported oid type {kind:?}");
                    }
                    if !is_valid_oid(hex) {
                        bail!("invalid oid {hex:?}");
                    }
                    oid = Some(hex.to_string());
                }
                "size" => {
                    let parsed = value
                        .parse::<u64>()
                        .map_err(|_| eyre!("invalid size {value:?}"))?;
                    size = Some(parsed);
                }
                k if k.starts_with("ext-") => {}
                other => bail!("unexpected pointer key {other:?}"),
            }
        }

        match (oid, size) {
            (Some(oid), Some(size)) => Ok(Self::new(oid, size, "")),
            (None, _) => bail!("pointer is missing an oid"),
            (_, None) => bail!("pointer is missing a size"),
        }
    }

    /// Canonical pointer file text.
    pub fn encode(&self) -> String {
        format!(
            "version {POINTER_VERSION}\noid {OID_TYPE}:{}\nsize {}\n",
            self.oid, self.size
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.oid, self.size)
    }
}

fn split_line(line: &str) -> Result<(&str, &str)> {
    line.trim_end()
        .split_once(' ')
        .ok_or_else(|| eyre!("malformed pointer line {line:?}"))
}

/// True for a lower-case hex SHA-256 digest.
pub fn is_valid_oid(oid: &str) -> bool {
    oid.len() == 64 && oid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
