#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::tempdir;

use blobsync_core::store::{hash_bytes, object_path};
use blobsync_core::Pointer;
use serde::Serialize;
use wait_timeout::ChildExt;

#[derive(Serialize)]
pub struct CliConfig {
    pub transfer: TransferSection,
    pub remotes: BTreeMap<String, PathBuf>,
}

#[derive(Serialize)]
pub struct TransferSection {
    pub concurrent_transfers: usize,
    pub batch_size: usize,
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub struct TestContext {
    pub _work: tempfile::TempDir,
    pub repo: PathBuf,
    pub remote_dir: PathBuf,
    pub config_dir: PathBuf,
    pub cli_bin: PathBuf,
}

impl TestContext {
    /// Fresh repository, empty remote directory, and a config naming the
    /// remote `origin`.
    pub fn new() -> Self {
        let work = tempdir().expect("tempdir");
        let workspace = work.path().to_path_buf();

        let repo = workspace.join("repo");
        fs::create_dir_all(&repo).expect("repo dir");
        let remote_dir = workspace.join("remote");
        fs::create_dir_all(&remote_dir).expect("remote dir");
        let config_dir = workspace.join("cli-config");
        fs::create_dir_all(&config_dir).expect("cli config");

        let config = CliConfig {
            transfer: TransferSection {
                concurrent_transfers: 2,
                batch_size: 4,
            },
            remotes: BTreeMap::from([("origin".to_string(), remote_dir.clone())]),
        };
        let config = toml::to_string(&config).expect("serialize config");
        fs::write(config_dir.join("config.toml"), config).expect("write config");

        let ctx = Self {
            _work: work,
            repo,
            remote_dir,
            config_dir,
            cli_bin: PathBuf::from(env!("CARGO_BIN_EXE_blobsync")),
        };
        ctx.git(&["init", "-q"]);
        ctx
    }

    pub fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(&self.repo)
            .stdout(Stdio::null())
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }

    pub fn local_objects(&self) -> PathBuf {
        self.repo.join(".git").join("lfs").join("objects")
    }

    /// Commit a pointer for `content` at `name`. When `store_locally` is set
    /// the content is also placed in the local object store.
    pub fn commit_object(&self, name: &str, content: &[u8], store_locally: bool) -> Pointer {
        let pointer = Pointer::new(hash_bytes(content), content.len() as u64, name);
        let path = self.repo.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("pointer parent");
        }
        fs::write(&path, pointer.encode()).expect("write pointer");
        if store_locally {
            write_object(&self.local_objects(), &pointer.oid, content);
        }
        self.git(&["add", name]);
        self.git(&["commit", "-q", "-m", name]);
        pointer
    }

    pub fn remote_has(&self, oid: &str) -> bool {
        object_path(&self.remote_dir, oid).is_file()
    }

    pub fn push_command(&self) -> Command {
        let mut cmd = Command::new(&self.cli_bin);
        cmd.current_dir(&self.repo)
            .arg("--config-dir")
            .arg(&self.config_dir)
            .arg("push");
        cmd
    }
}

pub fn write_object(root: &Path, oid: &str, content: &[u8]) {
    let path = object_path(root, oid);
    fs::create_dir_all(path.parent().expect("object parent")).expect("object dir");
    fs::write(path, content).expect("write object");
}

pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::process::Output {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().expect("spawn command");

    match child.wait_timeout(timeout).expect("wait for process") {
        Some(_status) => child
            .wait_with_output()
            .expect("collect command output after completion"),
        None => {
            let _ = child.kill();
            let output = child
                .wait_with_output()
                .expect("collect output after killing command");
            panic!(
                "command timed out after {:?}\nstdout:\n{}\nstderr:\n{}",
                timeout,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
    }
}
