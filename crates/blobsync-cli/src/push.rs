use crate::cli::PushArgs;
use crate::context::AppContext;
use eyre::{Result, WrapErr};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blobsync_core::config::Config;
use blobsync_core::errors::{PushError, TransferError};
use blobsync_core::git_scan::GitScanner;
use blobsync_core::pointer::is_valid_oid;
use blobsync_core::remote::RemoteEndpoint;
use blobsync_core::store::FsObjectStore;
use blobsync_core::upload::UploadOptions;
use blobsync_core::{Pointer, PushReport, UploadContext};

const DEFAULT_REF: &str = "HEAD";

/// Run a push and return the process exit status.
pub async fn run_push(ctx: &AppContext, args: &PushArgs) -> Result<i32> {
    let config = ctx.config.clone();
    let args = args.clone();
    let repo = std::env::current_dir().wrap_err("resolving current directory")?;
    log::debug!(
        "push from {} with config dir {}",
        repo.display(),
        ctx.config_dir.display()
    );

    let code = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        match execute_push(&config, &args, repo) {
            Ok(report) => {
                describe_push_result(&report, start.elapsed());
                report.exit_code()
            }
            Err(err) => {
                report_error(&err);
                err.exit_code()
            }
        }
    })
    .await?;
    Ok(code)
}

fn execute_push(config: &Config, args: &PushArgs, repo: PathBuf) -> Result<PushReport, PushError> {
    let Some(remote_name) = args.remote.as_deref() else {
        return Err(PushError::usage(
            "Specify a remote and a remote branch name (`blobsync push origin main`)",
        ));
    };
    let endpoint = RemoteEndpoint::parse(remote_name, config)
        .map_err(|_| PushError::usage(format!("Invalid remote name {remote_name:?}")))?;

    if args.object_id {
        if args.refs.is_empty() {
            return Err(PushError::usage(
                "Usage: blobsync push --object-id <remote> <object-id> [object-id] ...",
            ));
        }
        if let Some(bad) = args.refs.iter().find(|oid| !is_valid_oid(oid)) {
            return Err(PushError::usage(format!("Invalid object id {bad:?}")));
        }
    }

    let scanner = GitScanner::new(repo);
    let paths = scanner
        .discover()
        .wrap_err("blobsync push must be run inside a git repository")?;
    let store = FsObjectStore::for_repo(&paths.git_dir, &paths.work_tree);

    let mut transfer = config.transfer.clone();
    if let Some(workers) = args.workers {
        transfer.concurrent_transfers = workers.max(1);
    }
    let options = UploadOptions {
        dry_run: args.dry_run,
        show_progress: true,
        transfer,
    };
    let ctx = UploadContext::new(Arc::new(endpoint.store()), Arc::new(store), options);

    if args.object_id {
        let pointers: Vec<Pointer> = args.refs.iter().map(Pointer::from_oid).collect();
        ctx.upload_pointers(&pointers)?;
    } else {
        upload_between_refs_and_remote(&ctx, &scanner, args, &endpoint)?;
    }

    Ok(ctx.await_completion())
}

fn upload_between_refs_and_remote(
    ctx: &UploadContext,
    scanner: &GitScanner,
    args: &PushArgs,
    endpoint: &RemoteEndpoint,
) -> Result<(), PushError> {
    let mut refs = scanner
        .refs_by_names(&args.refs, args.all)
        .wrap_err("Error getting local refs.")?;
    if refs.is_empty() && !args.all {
        refs.push(DEFAULT_REF.to_string());
    }
    log::info!("upload refs {:?} to remote {}", refs, endpoint.name);

    for refname in &refs {
        let pointers = scan_left_or_all(scanner, refname, &endpoint.name, args.all)
            .wrap_err_with(|| format!("Error scanning for pointers in the {refname:?} ref"))?;
        ctx.upload_pointers(&pointers)?;
    }
    Ok(())
}

fn scan_left_or_all(
    scanner: &GitScanner,
    refname: &str,
    remote: &str,
    all: bool,
) -> Result<Vec<Pointer>> {
    let mut pointers = Vec::new();
    if all {
        pointers.extend(scanner.scan_ref_with_deleted(refname)?);
    }
    pointers.extend(scanner.scan_left_to_remote(refname, remote)?);
    Ok(pointers)
}

fn report_error(err: &PushError) {
    match err {
        PushError::Usage(msg) => eprintln!("{msg}"),
        other => eprintln!("{} {other}", "error:".red()),
    }
}

fn describe_push_result(report: &PushReport, elapsed: Duration) {
    for err in &report.errors {
        eprintln!("{} {}", "error:".red(), transfer_error_line(err));
    }
    if report.dry_run {
        return;
    }

    let stats = &report.stats;
    println!(
        "Push{} complete: {} object(s), {} uploaded in {:.2?}",
        if report.is_success() { "" } else { " partially" },
        stats.transferred_files,
        format_bytes(stats.transferred_bytes),
        elapsed
    );
    if stats.skipped_files > 0 {
        println!(
            "• Skipped: {} object(s), {} already on remote",
            stats.skipped_files,
            format_bytes(stats.skipped_bytes)
        );
    }
    if !report.is_success() {
        let transient = report.errors.iter().filter(|e| e.is_retryable()).count();
        if transient > 0 {
            println!(
                "• Failed: {} object(s), {} transient",
                report.errors.len(),
                transient
            );
        } else {
            println!("• Failed: {} object(s)", report.errors.len());
        }
    }
}

fn transfer_error_line(err: &TransferError) -> String {
    if err.is_retryable() {
        format!("{err} (transient, pushing again may succeed)")
    } else {
        err.to_string()
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes == 0 {
        return "0 B".to_owned();
    }
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
