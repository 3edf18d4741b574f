// CLI entry point
// Thin configuration layer over the engine: builds one mapping from
// command-line values, runs it, and exposes snapshot store maintenance

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};

use treesync::backup::{BackupManager, BackupMapping, BackupMode, Confirmer, FileMode, HashMode};
use treesync::cancel::CancellationToken;
use treesync::progress::ProgressEvent;
use treesync::store::{FindCriteria, RestoreSelector, SnapshotStore};

#[derive(Parser)]
#[command(
    name = "treesync",
    version,
    about = "Hash-indexed directory backup and mirroring tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a backup from one directory tree to another
    Run {
        /// Source directory
        source: PathBuf,
        /// Target directory
        target: PathBuf,
        /// Backup mode
        #[arg(long, value_enum, default_value_t = ModeArg::Push)]
        mode: ModeArg,
        /// File identity strategy
        #[arg(long, value_enum, default_value_t = HashArg::Content)]
        hash: HashArg,
        /// Only process files with these extensions (repeatable)
        #[arg(long = "file-type")]
        file_types: Vec<String>,
        /// Directories to skip entirely (repeatable)
        #[arg(long = "exclude")]
        exclude_dirs: Vec<PathBuf>,
        /// Directories whose contents are never deleted (repeatable)
        #[arg(long = "exclude-removal")]
        exclude_removal_dirs: Vec<PathBuf>,
        /// Replicate the directory skeleton only
        #[arg(long)]
        dirs_only: bool,
        /// Compute and log the plan without touching any file
        #[arg(long)]
        dry_run: bool,
        /// Skip all confirmation prompts
        #[arg(long, short = 'y')]
        yes: bool,
        /// Discard the cached hash index and rehash everything
        #[arg(long)]
        overwrite: bool,
        /// Log a warning for every duplicate content bucket
        #[arg(long)]
        warn_duplicates: bool,
    },
    /// Inspect or restore the snapshot store of a source directory
    #[command(subcommand)]
    Snapshots(SnapshotCommand),
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// List rotation snapshots with their metadata
    List {
        /// Source directory owning the store
        source: PathBuf,
        /// Only show snapshots whose description contains this text
        #[arg(long)]
        description: Option<String>,
    },
    /// Restore the hash index from a rotation snapshot
    Restore {
        /// Source directory owning the store
        source: PathBuf,
        /// Restore this exact snapshot file
        #[arg(long, conflicts_with_all = ["description", "at"])]
        path: Option<PathBuf>,
        /// Restore the most recent snapshot matching this description
        #[arg(long)]
        description: Option<String>,
        /// Restore the snapshot nearest to this RFC 3339 timestamp
        #[arg(long)]
        at: Option<String>,
        /// Restore only these tracked files (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Push,
    PushRemove,
    PushDuplicates,
    Mirror,
    MirrorDuplicates,
}

impl From<ModeArg> for BackupMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Push => BackupMode::Push,
            ModeArg::PushRemove => BackupMode::PushAndRemove,
            ModeArg::PushDuplicates => BackupMode::PushDuplicates,
            ModeArg::Mirror => BackupMode::Mirror,
            ModeArg::MirrorDuplicates => BackupMode::MirrorDuplicates,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HashArg {
    Name,
    NameParent,
    Content,
}

impl From<HashArg> for HashMode {
    fn from(value: HashArg) -> Self {
        match value {
            HashArg::Name => HashMode::FileName,
            HashArg::NameParent => HashMode::FileNameAndParent,
            HashArg::Content => HashMode::Sha256,
        }
    }
}

/// Asks on stdin; anything other than "y" declines.
struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{} ", prompt.yellow().bold());
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

fn main() -> Result<()> {
    treesync::logging::init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            source,
            target,
            mode,
            hash,
            file_types,
            exclude_dirs,
            exclude_removal_dirs,
            dirs_only,
            dry_run,
            yes,
            overwrite,
            warn_duplicates,
        } => run_backup(RunArgs {
            source,
            target,
            mode: mode.into(),
            hash: hash.into(),
            file_types,
            exclude_dirs,
            exclude_removal_dirs,
            dirs_only,
            dry_run,
            yes,
            overwrite,
            warn_duplicates,
        }),
        Command::Snapshots(command) => run_snapshots(command),
    }
}

struct RunArgs {
    source: PathBuf,
    target: PathBuf,
    mode: BackupMode,
    hash: HashMode,
    file_types: Vec<String>,
    exclude_dirs: Vec<PathBuf>,
    exclude_removal_dirs: Vec<PathBuf>,
    dirs_only: bool,
    dry_run: bool,
    yes: bool,
    overwrite: bool,
    warn_duplicates: bool,
}

fn run_backup(args: RunArgs) -> Result<()> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("=>-"),
    );
    let bar_handle = bar.clone();

    let mapping = BackupMapping::new("cli", &args.source, &args.target)
        .context("invalid source/target mapping")?
        .with_mode(args.mode)
        .with_hash_mode(args.hash)
        .with_file_mode(if args.dirs_only {
            FileMode::DirsOnly
        } else {
            FileMode::FilesAndDirs
        })
        .with_file_types(&args.file_types)
        .with_exclude_dirs(args.exclude_dirs)
        .with_exclude_removal_dirs(args.exclude_removal_dirs)
        .with_progress(Box::new(move |event: ProgressEvent| {
            bar_handle.set_length(event.total);
            bar_handle.set_position(event.current);
            if !event.message.is_empty() {
                bar_handle.set_message(event.message);
            }
        }));

    let mut manager = BackupManager::new("treesync")
        .with_mappings(vec![mapping])
        .with_test(args.dry_run)
        .with_overwrite(args.overwrite)
        .with_warn_duplicates(args.warn_duplicates)
        .with_skip_confirm(args.yes);

    let cancel = CancellationToken::new();
    let mut confirmer = StdinConfirmer;
    let reports = manager.run_backup(&mut confirmer, &cancel)?;
    bar.finish_and_clear();

    for report in &reports {
        if report.dry_run {
            println!("{}", "Dry run complete.".green().bold());
            println!("  Planned operations: {}", report.planned_ops);
            continue;
        }
        println!("{}", "Backup complete.".green().bold());
        println!("  Directories created:   {}", report.dirs_created);
        println!("  Files copied:          {}", report.files_copied);
        println!("  Files moved:           {}", report.files_moved);
        println!("  Files relocated:       {}", report.files_relocated);
        println!("  Source files removed:  {}", report.source_files_removed);
        println!(
            "  Stale entries removed: {}",
            report.stale_files_removed + report.stale_dirs_removed
        );
        if report.rolled_back {
            println!("{}", "  Run was rolled back.".red().bold());
        }
        if report.failures > 0 {
            println!("{}", format!("  Failures: {}", report.failures).red().bold());
        }
    }
    Ok(())
}

fn run_snapshots(command: SnapshotCommand) -> Result<()> {
    match command {
        SnapshotCommand::List {
            source,
            description,
        } => {
            let store = SnapshotStore::load(&source, false)?;
            let snapshots = match description {
                Some(description) => store.find(&FindCriteria {
                    description: Some(description),
                    ..FindCriteria::default()
                })?,
                None => store.list()?,
            };
            if snapshots.is_empty() {
                println!("No snapshots found for {}", source.display());
                return Ok(());
            }
            for info in snapshots {
                println!(
                    "{}  {}  {} files  {}  {}",
                    info.metadata.timestamp.dimmed(),
                    format_size(info.size, DECIMAL),
                    info.metadata.file_count,
                    if info.metadata.compressed { "xz" } else { "raw" },
                    info.metadata.description
                );
                println!("    {}", info.path.display().to_string().dimmed());
            }
        }
        SnapshotCommand::Restore {
            source,
            path,
            description,
            at,
            files,
        } => {
            let selector = if let Some(path) = path {
                RestoreSelector::ExplicitPath(path)
            } else if let Some(description) = description {
                RestoreSelector::Description(description)
            } else if let Some(at) = at {
                let timestamp = chrono::DateTime::parse_from_rfc3339(&at)
                    .context("--at expects an RFC 3339 timestamp")?;
                RestoreSelector::NearestTo(timestamp.with_timezone(&chrono::Utc))
            } else {
                RestoreSelector::MostRecent
            };
            let mut store = SnapshotStore::load(&source, false)?;
            let files = if files.is_empty() { None } else { Some(files) };
            store.restore(selector, files.as_deref(), &CancellationToken::new())?;
            println!("{}", "Restore complete.".green().bold());
        }
    }
    Ok(())
}
