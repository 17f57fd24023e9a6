//! star CLI - create, extract and list seekable star archives

use std::fs::{self, File, Permissions};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use star_rs::list::entries_to_json;
use star_rs::{
    format_entry, write_archive, ArchiveReader, Extractor, LocalSource, StarConfig, TarSource,
    TimeField,
};

#[derive(Parser)]
#[command(name = "star")]
#[command(about = "seekable archives - tar-like container with a trailing index")]
#[command(version)]
struct Cli {
    /// more logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// create an archive from files or from a single .tar file
    #[command(visible_alias = "c")]
    Create {
        /// archive to write
        archive: PathBuf,

        /// files and directories to add, or one tar file
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// overwrite an existing archive
        #[arg(short, long)]
        force: bool,

        /// resolve inputs relative to this directory
        #[arg(short = 'C', long)]
        directory: Option<PathBuf>,
    },

    /// extract entries from an archive
    #[command(visible_alias = "x")]
    Extract {
        /// archive to read
        archive: PathBuf,

        /// entries to extract (directories include their contents); all when omitted
        names: Vec<String>,

        /// extract into this directory
        #[arg(short = 'C', long)]
        directory: Option<PathBuf>,

        /// replace existing files
        #[arg(long)]
        overwrite: bool,

        /// restore archived ownership
        #[arg(long, conflicts_with = "no_same_owner")]
        same_owner: bool,

        /// keep files owned by the extracting user
        #[arg(long)]
        no_same_owner: bool,
    },

    /// list archive contents
    #[command(visible_alias = "t")]
    List {
        /// archive to read
        archive: PathBuf,

        /// print in ls style
        #[arg(short, long)]
        long: bool,

        /// print basename instead of full path
        #[arg(short, long)]
        basename: bool,

        /// print sizes in human-friendly units
        #[arg(short = 's', long)]
        human: bool,

        /// show ctime instead of mtime
        #[arg(short, long, conflicts_with = "atime")]
        ctime: bool,

        /// show atime instead of mtime
        #[arg(short, long)]
        atime: bool,

        /// print the index as JSON
        #[arg(long, conflicts_with_all = ["long", "basename"])]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StarConfig::load_default().context("loading config")?;

    match cli.command {
        Commands::Create {
            archive,
            inputs,
            force,
            directory,
        } => {
            create(&archive, &inputs, force || config.create.force, directory)?;
        }

        Commands::Extract {
            archive,
            names,
            directory,
            overwrite,
            same_owner,
            no_same_owner,
        } => {
            let reader = ArchiveReader::open(&archive)
                .with_context(|| format!("opening {}", archive.display()))?;

            let mut options = config.extract_options();
            options.overwrite |= overwrite;
            if same_owner {
                options.same_owner = true;
            }
            if no_same_owner {
                options.same_owner = false;
            }

            let root = directory.unwrap_or_else(|| PathBuf::from("."));
            let extractor = Extractor::new(&root, options);
            let count = if names.is_empty() {
                extractor.extract_all(&reader)
            } else {
                extractor.extract_matching(&reader, &names)
            }
            .with_context(|| format!("extracting {}", archive.display()))?;
            info!(count, root = %root.display(), "extracted entries");
        }

        Commands::List {
            archive,
            long,
            basename,
            human,
            ctime,
            atime,
            json,
        } => {
            let reader = ArchiveReader::open(&archive)
                .with_context(|| format!("opening {}", archive.display()))?;

            let mut out = BufWriter::new(io::stdout().lock());
            if json {
                writeln!(out, "{}", entries_to_json(reader.list_entries())?)?;
            } else {
                let mut options = config.list_options();
                options.long |= long;
                options.human |= human;
                options.basename = basename;
                if ctime {
                    options.time = TimeField::Ctime;
                } else if atime {
                    options.time = TimeField::Atime;
                }
                for entry in reader.list_entries() {
                    writeln!(out, "{}", format_entry(entry, &options))?;
                }
            }
            out.flush()?;
        }
    }

    Ok(())
}

/// Write the archive beside its final path and move it into place once complete
fn create(
    archive: &Path,
    inputs: &[PathBuf],
    force: bool,
    directory: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !force && archive.symlink_metadata().is_ok() {
        bail!("{} already exists (use --force to overwrite)", archive.display());
    }

    let parent = match archive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".star-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary file in {}", parent.display()))?;

    let single_tar = match inputs {
        [only] => only.extension().is_some_and(|ext| ext == "tar"),
        _ => false,
    };

    if single_tar {
        let tar_path = &inputs[0];
        let file =
            File::open(tar_path).with_context(|| format!("opening {}", tar_path.display()))?;
        let mut tar = tar::Archive::new(BufReader::new(file));
        let mut source = TarSource::new(&mut tar)?;
        write_archive(temp.as_file_mut(), &mut source)
            .with_context(|| format!("converting {}", tar_path.display()))?;
    } else {
        let own_file = temp.as_file().metadata()?;
        let mut source = LocalSource::new(inputs.iter().cloned()).exclude(&own_file);
        if let Some(dir) = directory {
            source = source.with_base(dir);
        }
        write_archive(temp.as_file_mut(), &mut source)
            .with_context(|| format!("creating {}", archive.display()))?;
    }

    fs::set_permissions(temp.path(), Permissions::from_mode(0o644))?;
    let persisted = if force {
        temp.persist(archive)
    } else {
        temp.persist_noclobber(archive)
    };
    persisted
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", archive.display()))?;

    info!(archive = %archive.display(), "archive created");
    Ok(())
}
