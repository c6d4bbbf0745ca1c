//! ftp-backup - Command-line front-end for the FTP backup engine.
//!
//! Collects credentials (vault, flags or prompts), lets the operator pick
//! the top-level folders to copy, then plans and runs the backup while a
//! reporter thread renders progress to stderr.
//!
//! Exit codes: 0 success, 1 fatal error (e.g. the initial connection
//! failed), 2 the run completed but some files or folders failed.

mod prompt;
mod report;

use chrono::Local;
use clap::Parser;
use engine::{
    available_dirs, connect, create_job, parse_worker_count, plan_job, run_job, BackupConfig, CredentialVault,
    Credentials, EventSink, FtpConnector, Selection, StorageMode, VaultError, WorkerCountWarning,
};
use prompt::Prompter;
use report::{summary_lines, Reporter};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// ftp-backup - Snapshot FTP folders to a local timestamped folder
#[derive(Parser, Debug)]
#[command(name = "ftp-backup")]
#[command(version = "0.1.0")]
#[command(about = "Back up selected folders of an FTP server with parallel downloads")]
struct Args {
    /// FTP host, optionally with :port
    #[arg(long, env = "FTP_BACKUP_HOST", value_name = "HOST")]
    host: Option<String>,

    /// FTP user
    #[arg(long, env = "FTP_BACKUP_USER", value_name = "USER")]
    user: Option<String>,

    /// FTP password
    #[arg(long, env = "FTP_BACKUP_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    password: Option<String>,

    /// Passphrase of the encrypted credential vault
    #[arg(long, env = "FTP_BACKUP_PASSPHRASE", hide_env_values = true, value_name = "PASSPHRASE")]
    passphrase: Option<String>,

    /// Number of download workers (invalid values fall back to 15)
    #[arg(long, value_name = "N")]
    workers: Option<String>,

    /// Folders to back up: 'all' or comma-separated numbers from the listing
    #[arg(long, value_name = "SELECTION")]
    dirs: Option<String>,

    /// Directory in which the backup folder is created
    #[arg(long, value_name = "PATH")]
    output_dir: Option<PathBuf>,

    /// Backup folder name prefix
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Directory holding stored credentials
    #[arg(long, value_name = "PATH")]
    vault_dir: Option<PathBuf>,

    /// JSON config file (output_dir, prefix, workers, vault_dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store the credentials after a successful login: encrypted or plaintext
    #[arg(long, value_name = "MODE")]
    save_credentials: Option<String>,

    /// Store plaintext credentials without asking for confirmation
    #[arg(long)]
    confirm_plaintext: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// How a run that got past the fatal stages ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Clean,
    CompletedWithFailures,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let stdin = io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), io::stdout());

    let exit_code = match run_cli(&args, &mut prompter) {
        Ok(RunStatus::Clean) => 0,
        Ok(RunStatus::CompletedWithFailures) => 2,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Engine diagnostics go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Main CLI logic - separated for testability
fn run_cli<R: BufRead, W: Write>(args: &Args, prompter: &mut Prompter<R, W>) -> Result<RunStatus, String> {
    let save_mode = parse_save_mode(args.save_credentials.as_deref())?;
    let (mut config, config_warning) = load_config(args)?;

    let vault = CredentialVault::new(&config.vault_dir);
    let credentials = resolve_credentials(args, &vault, prompter)?;

    config.workers = match &args.workers {
        Some(value) => {
            let (workers, warning) = parse_worker_count(value);
            if let Some(warning) = warning {
                prompter.say(&format!("Warning: {}", warning))?;
            }
            workers
        }
        None if args.config.is_some() => {
            if let Some(warning) = config_warning {
                prompter.say(&format!("Warning: config file workers: {}", warning))?;
            }
            config.workers
        }
        None => prompter.ask_workers()?,
    };

    prompter.say(&format!("Connecting to {} for initial scan...", credentials.host))?;
    let mut session = connect(&credentials).map_err(|e| format!("Connection error: {}", e))?;
    prompter.say("Connection established.")?;

    if let Some(mode) = save_mode {
        store_credentials(&vault, &credentials, mode, args, prompter)?;
    }

    let available = available_dirs(&mut session, &EventSink::disabled());
    if available.is_empty() {
        prompter.say("No folders found on server or scan error.")?;
        return Ok(RunStatus::Clean);
    }

    let selection = match &args.dirs {
        Some(value) => {
            Selection::parse(value, &available).map_err(|e| format!("Invalid folder selection '{}': {}", value, e))?
        }
        None => prompter.ask_selection(&available)?,
    };

    let mut job = create_job(&config, &selection, &available, Local::now().naive_local())
        .map_err(|e| format!("Job creation failed: {}", e))?;
    debug!(job = %job.id, root = %job.backup_root.display(), "backup job created");

    let (events, rx) = EventSink::channel();
    let reporter = Reporter::spawn(rx, args.verbose).map_err(|e| format!("Failed to start progress reporter: {}", e))?;

    plan_job(&mut job, &mut session, &events).map_err(|e| format!("Job planning failed: {}", e))?;
    // The discovery connection is not needed during downloads
    drop(session);

    let connector = FtpConnector::new(credentials.clone());
    let report = run_job(&mut job, &connector, &events).map_err(|e| format!("Job execution failed: {}", e))?;

    drop(events);
    match reporter.join() {
        Ok(stats) => debug!(
            files_found = stats.files_found,
            files_done = stats.files_done,
            files_failed = stats.files_failed,
            explore_failures = stats.explore_failures,
            worker_connect_failures = stats.worker_connect_failures,
            bytes = stats.bytes_downloaded,
            "reporter finished"
        ),
        Err(_) => warn!("progress reporter thread panicked"),
    }

    for line in summary_lines(&job, &report) {
        eprintln!("{}", line);
    }

    if report.failed_count() > 0 || !job.explore_errors.is_empty() {
        Ok(RunStatus::CompletedWithFailures)
    } else {
        Ok(RunStatus::Clean)
    }
}

fn parse_save_mode(value: Option<&str>) -> Result<Option<StorageMode>, String> {
    match value.map(str::to_lowercase).as_deref() {
        None => Ok(None),
        Some("encrypted") => Ok(Some(StorageMode::Encrypted)),
        Some("plaintext") => Ok(Some(StorageMode::Plaintext)),
        Some(other) => Err(format!(
            "Invalid credential storage mode '{}'. Must be 'encrypted' or 'plaintext'",
            other
        )),
    }
}

/// Config file values first, then command-line overrides.
fn load_config(args: &Args) -> Result<(BackupConfig, Option<WorkerCountWarning>), String> {
    let (mut config, warning) = match &args.config {
        Some(path) => BackupConfig::from_file(path).map_err(|e| e.to_string())?,
        None => (BackupConfig::default(), None),
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(dir) = &args.vault_dir {
        config.vault_dir = dir.clone();
    }
    Ok((config, warning))
}

/// Stored credentials first, then flags, then prompts for whatever is
/// still missing. Flags override stored fields.
fn resolve_credentials<R: BufRead, W: Write>(
    args: &Args,
    vault: &CredentialVault,
    prompter: &mut Prompter<R, W>,
) -> Result<Credentials, String> {
    let complete_flags = args.host.is_some() && args.user.is_some() && args.password.is_some();
    let stored = if complete_flags {
        None
    } else {
        load_stored(args, vault, prompter)?
    };

    let mut credentials = match stored {
        Some(credentials) => credentials,
        None => Credentials::new(
            ask_unless_given(prompter, &args.host, "Enter FTP host (e.g. ftp.example.com): ")?,
            ask_unless_given(prompter, &args.user, "Enter FTP user: ")?,
            ask_unless_given(prompter, &args.password, "Enter FTP password (input is visible): ")?,
        ),
    };

    if let Some(host) = &args.host {
        credentials.host = host.clone();
    }
    if let Some(user) = &args.user {
        credentials.user = user.clone();
    }
    if let Some(password) = &args.password {
        credentials.password = password.clone();
    }
    Ok(credentials)
}

/// Load stored credentials. A vault that cannot be opened falls back to
/// manual entry rather than failing the run.
fn load_stored<R: BufRead, W: Write>(
    args: &Args,
    vault: &CredentialVault,
    prompter: &mut Prompter<R, W>,
) -> Result<Option<Credentials>, String> {
    let loaded = match vault.stored_mode() {
        None => return Ok(None),
        Some(StorageMode::Encrypted) => {
            let passphrase = ask_unless_given(prompter, &args.passphrase, "Enter vault passphrase: ")?;
            vault.load_encrypted(&passphrase)
        }
        Some(StorageMode::Plaintext) => vault.load_plaintext(),
    };

    match loaded {
        Ok(credentials) => {
            debug!(user = %credentials.user, "using stored credentials");
            Ok(Some(credentials))
        }
        Err(VaultError::DecryptFailed) => {
            prompter.say("Could not unlock the credential vault; enter the credentials manually.")?;
            Ok(None)
        }
        Err(e) => {
            warn!("failed to load stored credentials: {}", e);
            prompter.say(&format!("Could not read stored credentials ({}); enter them manually.", e))?;
            Ok(None)
        }
    }
}

/// A failed save is reported and the backup goes ahead.
fn store_credentials<R: BufRead, W: Write>(
    vault: &CredentialVault,
    credentials: &Credentials,
    mode: StorageMode,
    args: &Args,
    prompter: &mut Prompter<R, W>,
) -> Result<(), String> {
    let saved = match mode {
        StorageMode::Plaintext => {
            if !args.confirm_plaintext && !prompter.confirm("Store credentials unencrypted? [y/N]: ")? {
                prompter.say("Credentials not saved.")?;
                return Ok(());
            }
            vault.save_plaintext(credentials)
        }
        StorageMode::Encrypted => {
            let passphrase = match &args.passphrase {
                Some(passphrase) => passphrase.clone(),
                None => {
                    let first = prompter.ask_non_empty("Choose a vault passphrase: ")?;
                    let second = prompter.ask("Repeat the passphrase: ")?;
                    if first != second {
                        prompter.say("Warning: passphrases differ, credentials not saved.")?;
                        return Ok(());
                    }
                    first
                }
            };
            vault.save_encrypted(credentials, &passphrase)
        }
    };

    match saved {
        Ok(()) => prompter.say("Credentials saved."),
        Err(e) => prompter.say(&format!("Warning: could not save credentials: {}", e)),
    }
}

fn ask_unless_given<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    given: &Option<String>,
    question: &str,
) -> Result<String, String> {
    match given {
        Some(value) => Ok(value.clone()),
        None => prompter.ask_non_empty(question),
    }
}
