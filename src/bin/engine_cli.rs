//! Command-line front end for the Engine: opens (or creates) a volume
//! file and runs a single operation against it, the way `engine-cli` is
//! meant to be scripted from a shell.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use engine::{AccessContext, Config, Engine, FileSectorDevice, QuotaLimits, QuotaScope, SectorDevice};

/// Content-addressed, versioned filesystem engine.
#[derive(Debug, Parser)]
#[command(name = "engine-cli", version, about)]
struct Cli {
    /// Path to the volume file, created on first use.
    #[arg(long, env = "ENGINE_VOLUME", default_value = "engine.vol")]
    volume: PathBuf,

    /// Log level passed to the tracing subscriber.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Creates a directory.
    Mkdir { path: String },
    /// Creates or overwrites a file with the given text.
    Write { path: String, text: String },
    /// Appends text to an existing file.
    Append { path: String, text: String },
    /// Prints a file's content to stdout.
    Cat { path: String },
    /// Hides (soft-deletes) an entry.
    Hide { path: String },
    /// Deletes an entry. Always transformed into a hide — the Engine keeps
    /// no true delete (spec-level "no destructive path" guarantee).
    Delete { path: String },
    /// Renames/moves an entry.
    Mv { src: String, dst: String },
    /// Zero-copy duplicates an entry.
    Cp { src: String, dst: String },
    /// Creates a hard link.
    Ln { src: String, dst: String },
    /// Creates a symlink pointing at `target`.
    Symlink { target: String, path: String },
    /// Prints an entry's metadata.
    Stat { path: String },
    /// Lists a directory's visible children.
    Ls { path: String },
    /// Finds paths whose final component contains `pattern`.
    Find { pattern: String },
    /// Greps visible file content for `pattern`.
    Grep { pattern: String },
    /// Freezes the current head under `label`.
    Snapshot { label: String },
    /// Diffs two view ids.
    Diff { a: u64, b: u64 },
    /// Creates a branch from the current head.
    BranchCreate { name: String },
    /// Switches the current branch.
    BranchSwitch { name: String },
    /// Merges `source` into the current branch.
    BranchMerge { source: String, label: String },
    /// Sets the volume-wide byte quota.
    QuotaSetVolumeBytes { max_bytes: u64 },
    /// Prints volume-wide quota usage and limits.
    QuotaGetVolume,
    /// Prints the audit ring.
    AuditLog,
    /// Prints a health report.
    Health,
    /// Reclaims unreachable, zero-refcount blobs.
    Compact,
    /// Prints the process-wide access context currently in effect.
    GetContext,
    /// Replaces the process-wide access context.
    SetContext { uid: u32, gid: u32, caps: u32 },
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn load_or_create(path: &PathBuf) -> engine::Result<Engine> {
    let device = FileSectorDevice::open(path)?;
    if device.sector_count() == 0 {
        Ok(Engine::new(Config::new().with_created_ts(now())))
    } else {
        Engine::load(Config::new(), &device)
    }
}

fn save(path: &PathBuf, engine: &Engine) -> engine::Result<()> {
    let mut device = FileSectorDevice::open(path)?;
    engine.save(&mut device)
}

fn run(cli: &Cli, engine: &mut Engine, ctx: &AccessContext) -> engine::Result<()> {
    let ts = now();
    match &cli.command {
        Command::Mkdir { path } => engine.mkdir(ctx, path, ts),
        Command::Write { path, text } => engine.write_file(ctx, path, text.as_bytes(), ts),
        Command::Append { path, text } => engine.append(ctx, path, text.as_bytes(), ts),
        Command::Cat { path } => {
            engine.stat(ctx, path, ts)?;
            let limit = engine.config().symlink_depth_limit;
            let entry =
                engine::namespace::resolve(engine.view_graph(), engine.current_head(), path, limit)?;
            let bytes = match entry.kind {
                engine::EntryKind::File { blob } | engine::EntryKind::HardLink { blob } => {
                    engine.pool().get(&blob)?.to_vec()
                }
                _ => {
                    return Err(engine::EngineError::InvalidArgument(format!(
                        "{path} is not a file"
                    )))
                }
            };
            println!("{}", String::from_utf8_lossy(&bytes));
            Ok(())
        }
        Command::Hide { path } => engine.hide(ctx, path, ts),
        Command::Delete { path } => engine.delete(ctx, path, ts),
        Command::Mv { src, dst } => engine.move_entry(ctx, src, dst, ts),
        Command::Cp { src, dst } => engine.copy(ctx, src, dst, ts),
        Command::Ln { src, dst } => engine.hardlink(ctx, src, dst, ts),
        Command::Symlink { target, path } => engine.symlink(ctx, target, path, ts),
        Command::Stat { path } => {
            let s = engine.stat(ctx, path, ts)?;
            println!("{s:#?}");
            Ok(())
        }
        Command::Ls { path } => {
            for entry in engine.list(ctx, path, ts)? {
                println!("{}\t{}", entry.kind, entry.name);
            }
            Ok(())
        }
        Command::Find { pattern } => {
            for path in engine.find(ctx, pattern, ts)? {
                println!("{path}");
            }
            Ok(())
        }
        Command::Grep { pattern } => {
            for (path, line) in engine.grep(ctx, pattern, ts)? {
                println!("{path}:{line}");
            }
            Ok(())
        }
        Command::Snapshot { label } => {
            let id = engine.snapshot(ctx, label, ts)?;
            println!("view {id}");
            Ok(())
        }
        Command::Diff { a, b } => {
            for (path, kind) in engine.view_diff(*a, *b) {
                println!("{path}\t{kind:?}");
            }
            Ok(())
        }
        Command::BranchCreate { name } => engine.branch_create(ctx, name, ts).map(|_| ()),
        Command::BranchSwitch { name } => engine.branch_switch(ctx, name, ts),
        Command::BranchMerge { source, label } => {
            let outcome = engine.branch_merge(ctx, source, label, ts)?;
            println!("view {}, {} conflict(s)", outcome.new_head, outcome.conflicts.len());
            for path in &outcome.conflicts {
                println!("conflict: {path}");
            }
            Ok(())
        }
        Command::QuotaSetVolumeBytes { max_bytes } => engine.quota_set(
            ctx,
            QuotaScope::Volume,
            QuotaLimits {
                max_bytes: Some(*max_bytes),
                max_refs: None,
                max_views: None,
            },
            ts,
        ),
        Command::QuotaGetVolume => {
            let (limits, usage) = engine.quota_get(QuotaScope::Volume);
            println!("{limits:?} {usage:?}");
            Ok(())
        }
        Command::AuditLog => {
            for entry in engine.audit_log().entries() {
                println!("{entry:?}");
            }
            Ok(())
        }
        Command::Health => {
            let report = engine.health();
            println!("{report:#?}");
            Ok(())
        }
        Command::Compact => {
            let dropped = engine.compact(ctx, ts)?;
            println!("reclaimed {dropped} blob(s)");
            Ok(())
        }
        Command::GetContext => {
            println!("{:#?}", engine.get_context());
            Ok(())
        }
        Command::SetContext { uid, gid, caps } => {
            engine.set_context(AccessContext::new(*uid, *gid, *caps));
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = engine::logging::init_logging(&cli.log_level) {
        eprintln!("warning: {e}");
    }

    let mut eng = match load_or_create(&cli.volume) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let ctx = AccessContext::root();

    match run(&cli, &mut eng, &ctx) {
        Ok(()) => {
            if let Err(e) = save(&cli.volume, &eng) {
                eprintln!("error saving volume: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
