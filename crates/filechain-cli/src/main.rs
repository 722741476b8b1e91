use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use filechain_core::paths::{data_dir, settings_path};
use filechain_core::{FileStatus, FileStore, StoreSettings};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "FILECHAIN_PASSWORD";
const EXIT_INTEGRITY: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "filechain")]
#[command(author, version, about = "Encrypted file storage with a tamper-evident ledger", long_about = None)]
struct Cli {
    /// Storage root (defaults to FILECHAIN_DATA_DIR, then the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file into the store and record it in the ledger
    Store {
        path: PathBuf,
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Decrypt a stored file and check it against the ledger
    Retrieve {
        file_id: String,
        /// Directory to write the decrypted file into (defaults to cwd)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List stored files
    List,

    /// Delete a stored file (its ledger history is kept)
    Delete { file_id: String },

    /// Verify the ledger hash chain
    Verify,

    /// Show the ledger history of a file
    History { file_id: String },

    /// Show metadata and ledger history of a stored file
    Details { file_id: String },

    /// Verify the chain and report files without ledger coverage or blobs
    Audit,
}

#[derive(Serialize)]
struct ChainStatus {
    chain_valid: bool,
    blocks: usize,
    difficulty: usize,
}

#[derive(Serialize)]
struct Deleted<'a> {
    file_id: &'a str,
    deleted: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let root = resolve_root(cli.data_dir)?;
    let settings = StoreSettings::load(settings_path(&root)).context("load settings")?;
    let store = FileStore::open_with_settings(&root, &settings)
        .with_context(|| format!("open store at {}", root.display()))?;
    info!(root = %root.display(), "store opened");

    match cli.command {
        Commands::Store { path, description } => {
            let password = read_password(true)?;
            let file_id = store
                .store(&path, password.as_bytes(), &description)
                .with_context(|| format!("store {}", path.display()))?;
            print_json(&serde_json::json!({ "file_id": file_id }))?;
        }

        Commands::Retrieve {
            file_id,
            output_dir,
        } => {
            let output_dir = match output_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let password = read_password(false)?;
            let retrieved = store
                .retrieve(&file_id, password.as_bytes(), &output_dir)
                .with_context(|| format!("retrieve {file_id}"))?;
            print_json(&retrieved)?;
            if !retrieved.integrity_ok {
                eprintln!("integrity check FAILED: decrypted output does not match the ledger");
                return Ok(ExitCode::from(EXIT_INTEGRITY));
            }
        }

        Commands::List => {
            print_json(&store.list())?;
        }

        Commands::Delete { file_id } => {
            let deleted = store
                .delete(&file_id)
                .with_context(|| format!("delete {file_id}"))?;
            print_json(&Deleted {
                file_id: &file_id,
                deleted,
            })?;
            if !deleted {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Verify => {
            let ledger = store.ledger();
            let status = ChainStatus {
                chain_valid: ledger.verify_chain(),
                blocks: ledger.len(),
                difficulty: ledger.difficulty(),
            };
            print_json(&status)?;
            if !status.chain_valid {
                return Ok(ExitCode::from(EXIT_INTEGRITY));
            }
        }

        Commands::History { file_id } => {
            print_json(&store.get_history(&file_id))?;
        }

        Commands::Details { file_id } => {
            let details = store
                .details(&file_id)
                .with_context(|| format!("details {file_id}"))?;
            print_json(&details)?;
        }

        Commands::Audit => {
            let report = store.audit();
            print_json(&report)?;
            let clean = report.chain_valid
                && report.files.iter().all(|f| f.status == FileStatus::Tracked);
            if !clean {
                return Ok(ExitCode::from(EXIT_INTEGRITY));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_root(flag: Option<PathBuf>) -> Result<PathBuf> {
    let root = match flag {
        Some(dir) => dir,
        None => data_dir()?,
    };
    if root.is_relative() {
        return Ok(std::env::current_dir()?.join(root));
    }
    Ok(root)
}

fn read_password(confirm: bool) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let first = Zeroizing::new(
        rpassword::prompt_password("Password: ").map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if first.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    if confirm {
        let second = Zeroizing::new(
            rpassword::prompt_password("Confirm password: ")
                .map_err(|e| anyhow!("password prompt: {e}"))?,
        );
        if *first != *second {
            return Err(anyhow!("passwords do not match"));
        }
    }
    Ok(first)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
