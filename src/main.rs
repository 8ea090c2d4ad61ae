use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;

use fss::cli::{Cli, Command};
use fss::collab::RealFsProbe;
use fss::config::Config;
use fss::context::{CompileContext, Round};
use fss::demo::{DemoRegistry, DemoRootIndex, DemoScope, DemoStampsStorage};
use fss::error::FssError;
use fss::model::BuildTarget;
use fss::util::lock::Lockfile;
use fss::util::logging;
use fss::{wire, FsState, FsStateOptions};

/// Bumped whenever the layout `FsState::save`/`load` produce changes.
/// `FilesDelta`'s own wire format carries no version byte, so this
/// binary owns the check for its snapshot file as a whole.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StatusReport {
    target: String,
    has_work_to_do: bool,
    has_unprocessed_changes: bool,
}

fn load_snapshot(fss: &FsState, path: &Utf8PathBuf) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let mut f = std::io::BufReader::new(
        File::open(path.as_std_path()).with_context(|| format!("opening fss snapshot at {path}"))?,
    );
    let found = wire::read_u32(&mut f)?;
    if found != SNAPSHOT_FORMAT_VERSION {
        return Err(FssError::VersionMismatch {
            path: path.clone(),
            found,
            expected: SNAPSHOT_FORMAT_VERSION,
        }
        .into());
    }
    let registry = DemoRegistry;
    fss.load(&mut f, &registry, |target, root_id| {
        (root_id == 1).then(|| fss::demo::root_for(target.clone()))
    })?;
    Ok(())
}

fn save_snapshot(fss: &FsState, path: &Utf8PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {parent}"))?;
    }
    let mut w = BufWriter::new(
        File::create(path.as_std_path()).with_context(|| format!("creating fss snapshot at {path}"))?,
    );
    wire::write_u32(&mut w, SNAPSHOT_FORMAT_VERSION)?;
    fss.save(&mut w)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let cfg = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(_) => Config::default(),
    };

    let lock_path = Utf8PathBuf::from(".fss.lock");
    let _lock = Lockfile::acquire(lock_path).context("another fss process is already running here")?;

    let target = BuildTarget::new(fss::demo::DEMO_TYPE_ID, cli.target.clone());
    let root_index = Arc::new(DemoRootIndex::new());
    let root = fss::demo::root_for(target.clone());
    root_index.register(Utf8PathBuf::from("."), root.clone());

    let options = FsStateOptions {
        always_scan_fs: cfg.always_scan_fs,
        casing: cfg.path_casing,
    };
    let fss = FsState::new(options, Arc::new(RealFsProbe), root_index);
    load_snapshot(&fss, &cfg.snapshot)?;
    fss.mark_initial_scan_performed(&target);

    let scope = Arc::new(DemoScope);
    let context = CompileContext::new(scope);
    let stamps = DemoStampsStorage::new();

    match &cli.command {
        Command::Dirty(args) => {
            let marked = if args.if_not_deleted {
                fss.mark_dirty_if_not_deleted(Some(&context), Round::Next, &args.file, &root, Some(&stamps))?
            } else {
                fss.mark_dirty(Some(&context), Round::Next, &args.file, &root, Some(&stamps), true)?
            };
            tracing::info!(file = %args.file, marked, "dirty");
        }
        Command::Deleted(args) => {
            fss.register_deleted(Some(&context), &target, &args.file, Some(&stamps))?;
            tracing::info!(file = %args.file, "deleted");
        }
        Command::Round => {
            fss.before_chunk_build_start(&context, vec![target.clone()]);
            fss.before_next_round_start(&context, &[target.clone()]);
            context.set_compilation_start_stamp(target.clone(), now_millis());

            let mut count = 0usize;
            fss.process_files_to_recompile(&context, &target, |_, file, _| {
                println!("{file}");
                count += 1;
                true
            });
            tracing::info!(count, "round");
        }
        Command::Settle => {
            let changed = fss.mark_all_up_to_date(&context, &root, &stamps)?;
            tracing::info!(changed, "settle");
        }
        Command::Status => {
            let has_work_to_do = fss.has_work_to_do(&target);
            context.set_compilation_start_stamp(target.clone(), now_millis());
            let has_unprocessed_changes = fss.has_unprocessed_changes(&context, &target)?;
            let report = StatusReport {
                target: target.to_string(),
                has_work_to_do,
                has_unprocessed_changes,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Clear => {
            fss.clear_all();
            tracing::info!("clear");
        }
    }

    save_snapshot(&fss, &cfg.snapshot)?;
    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
