//! Finds pointers in git history by shelling out to `git`.

use eyre::{bail, eyre, Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crate::pointer::{Pointer, MAX_POINTER_SIZE};

/// Repository locations needed by a push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoPaths {
    pub git_dir: PathBuf,
    pub work_tree: PathBuf,
}

#[derive(Clone, Debug)]
pub struct GitScanner {
    repo: PathBuf,
}

impl GitScanner {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    /// Locate the git directory and working tree containing `self.repo`.
    pub fn discover(&self) -> Result<RepoPaths> {
        let out = self.git(&["rev-parse", "--absolute-git-dir", "--show-toplevel"])?;
        let mut lines = out.lines();
        let git_dir = lines
            .next()
            .ok_or_else(|| eyre!("git rev-parse returned no git directory"))?;
        let work_tree = lines
            .next()
            .ok_or_else(|| eyre!("not inside a git working tree"))?;
        Ok(RepoPaths {
            git_dir: PathBuf::from(git_dir),
            work_tree: PathBuf::from(work_tree),
        })
    }

    pub fn local_refs(&self) -> Result<Vec<String>> {
        let out = self.git(&[
            "for-each-ref",
            "--format=%(refname:short)",
            "refs/heads",
            "refs/tags",
        ])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// With `all` and no names, every local ref. Otherwise the names as
    /// given; git resolves anything that is not a local ref name.
    pub fn refs_by_names(&self, names: &[String], all: bool) -> Result<Vec<String>> {
        if all && names.is_empty() {
            return self.local_refs();
        }
        Ok(names.to_vec())
    }

    /// Pointers reachable from `refname` but not from `remote`'s
    /// remote-tracking refs.
    pub fn scan_left_to_remote(&self, refname: &str, remote: &str) -> Result<Vec<Pointer>> {
        let exclude = format!("--remotes={remote}");
        self.scan_rev_list(&["rev-list", "--objects", refname, "--not", &exclude])
    }

    /// Every pointer in the history of `refname`, including ones whose files
    /// have since been deleted.
    pub fn scan_ref_with_deleted(&self, refname: &str) -> Result<Vec<Pointer>> {
        self.scan_rev_list(&["rev-list", "--objects", refname])
    }

    fn scan_rev_list(&self, args: &[&str]) -> Result<Vec<Pointer>> {
        let listing = self.git(args)?;

        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        for line in listing.lines() {
            // Commits carry no path; trees and blobs do.
            let Some((sha, path)) = line.split_once(' ') else {
                continue;
            };
            if path.is_empty() || !seen.insert(sha.to_string()) {
                continue;
            }
            objects.push((sha.to_string(), path.to_string()));
        }
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let check_input: String = objects.iter().map(|(sha, _)| format!("{sha}\n")).collect();
        let check_out = self.git_with_input(&["cat-file", "--batch-check"], check_input)?;
        let candidates: HashSet<String> = String::from_utf8_lossy(&check_out)
            .lines()
            .filter_map(|line| {
                let mut parts = line.split(' ');
                let sha = parts.next()?;
                let kind = parts.next()?;
                let size: usize = parts.next()?.parse().ok()?;
                (kind == "blob" && size < MAX_POINTER_SIZE).then(|| sha.to_string())
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: Vec<_> = objects
            .into_iter()
            .filter(|(sha, _)| candidates.contains(sha))
            .collect();
        let batch_input: String = wanted.iter().map(|(sha, _)| format!("{sha}\n")).collect();
        let batch_out = self.git_with_input(&["cat-file", "--batch"], batch_input)?;
        let blobs = parse_batch_output(&batch_out)?;

        let mut pointers = Vec::new();
        for ((sha, path), (blob_sha, content)) in wanted.iter().zip(blobs) {
            if *sha != blob_sha {
                bail!("git cat-file returned {blob_sha} where {sha} was expected");
            }
            let Ok(text) = std::str::from_utf8(&content) else {
                continue;
            };
            if let Ok(pointer) = Pointer::parse(text) {
                pointers.push(pointer.with_name(path.clone()));
            }
        }
        log::debug!(
            "scanned {} candidate blob(s), found {} pointer(s)",
            wanted.len(),
            pointers.len()
        );
        Ok(pointers)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.repo);
        cmd
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command(args)
            .output()
            .with_context(|| format!("running git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn git_with_input(&self, args: &[&str], input: String) -> Result<Vec<u8>> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("running git {}", args.join(" ")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre!("git {} has no stdin", args.join(" ")))?;
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for git {}", args.join(" ")))?;
        let written = writer
            .join()
            .map_err(|_| eyre!("git {} input writer panicked", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        written.with_context(|| format!("writing input to git {}", args.join(" ")))?;
        Ok(output.stdout)
    }
}

/// Split `git cat-file --batch` output into `(sha, content)` records.
fn parse_batch_output(mut buf: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut records = Vec::new();
    while !buf.is_empty() {
        let header_end = buf
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| eyre!("truncated cat-file header"))?;
        let header = std::str::from_utf8(&buf[..header_end])?;
        buf = &buf[header_end + 1..];

        let mut parts = header.split(' ');
        let sha = parts.next().unwrap_or_default().to_string();
        let kind = parts.next().unwrap_or_default();
        if kind == "missing" {
            bail!("object {sha} is missing from the repository");
        }
        let size: usize = parts
            .next()
            .ok_or_else(|| eyre!("cat-file header {header:?} has no size"))?
            .parse()
            .with_context(|| format!("cat-file header {header:?}"))?;
        if buf.len() < size + 1 {
            bail!("truncated cat-file content for {sha}");
        }
        records.push((sha, buf[..size].to_vec()));
        buf = &buf[size + 1..];
    }
    Ok(records)
}
