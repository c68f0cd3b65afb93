//! Vault Export - CLI
//!
//! Export a vault directory into one encrypted archive and restore it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

use vault_export::{
    container, strategy_for, CancelToken, DirectoryVault, ExportConfig, MemoryVault, Password,
    ProgressObserver, VaultExporter, VaultStorage, ARCHIVE_EXTENSION,
};

#[derive(Parser)]
#[command(name = "vault-export")]
#[command(author = "ALFA SYSTEM")]
#[command(version = vault_export::VERSION)]
#[command(about = "Password-protected vault export and import")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every vault file into one archive
    Export {
        /// Vault root directory
        #[arg(short, long)]
        vault: PathBuf,

        /// Archive path (default: vault_export_<millis>.vxa)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Restore an archive into a directory
    Import {
        /// Archive path
        #[arg(short, long)]
        input: PathBuf,

        /// Destination root
        #[arg(short, long)]
        dest: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Decrypt and authenticate an archive without writing anything
    Verify {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show archive parameters and entries (no password)
    Inspect {
        #[arg(short, long)]
        input: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List vault files and their text extraction strategy
    List {
        #[arg(short, long)]
        vault: PathBuf,
    },
}

/// Drives a terminal progress bar from export/import events
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl ProgressObserver for BarObserver {
    fn operation_started(&self, total: Option<usize>) {
        match total {
            Some(total) => self.bar.set_length(total as u64),
            None => self.bar.set_style(ProgressStyle::default_spinner()),
        }
    }

    fn entry_started(&self, _index: usize, path: &str) {
        self.bar.set_message(path.to_string());
    }

    fn entry_finished(&self, _index: usize, _path: &str, _ok: bool) {
        self.bar.inc(1);
    }
}

impl Drop for BarObserver {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn read_password(confirm: bool) -> anyhow::Result<Password> {
    let mut entered = rpassword::prompt_password("Vault password: ").context("reading password")?;
    if confirm {
        let mut again = rpassword::prompt_password("Repeat password: ").context("reading password")?;
        let matches = again == entered;
        again.zeroize();
        if !matches {
            entered.zeroize();
            bail!("Passwords do not match");
        }
    }

    let password = Password::take_from(&mut entered);
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ExportConfig::default()),
    }
}

fn default_output() -> PathBuf {
    PathBuf::from(format!(
        "vault_export_{}.{}",
        chrono::Utc::now().timestamp_millis(),
        ARCHIVE_EXTENSION
    ))
}

/// Cancels `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current entry...");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Export {
            vault,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let output = output.unwrap_or_else(default_output);
            let password = read_password(true)?;

            let observer = Arc::new(BarObserver::new());
            let exporter = VaultExporter::new(DirectoryVault::new(&vault), config)
                .with_observer(observer.clone());
            cancel_on_ctrl_c(exporter.cancel_token());

            let task_exporter = exporter.clone();
            let task_output = output.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                task_exporter.export_to(password, || File::create(&task_output))
            })
            .await
            .context("export task panicked")?;
            observer.bar.finish_and_clear();

            println!("{}", outcome);
            if outcome.summary().is_some_and(|s| s.complete) {
                println!("Archive written to {}", output.display());
            }
            Ok(outcome.is_success())
        }

        Commands::Import {
            input,
            dest,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let source = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let password = read_password(false)?;

            let target = Arc::new(DirectoryVault::create(&dest)?);
            let observer = Arc::new(BarObserver::new());
            let exporter =
                VaultExporter::from_shared(Arc::clone(&target), config).with_observer(observer.clone());
            cancel_on_ctrl_c(exporter.cancel_token());

            let outcome = exporter.import_task(source, password, target).await;
            observer.bar.finish_and_clear();

            println!("{}", outcome);
            Ok(outcome.is_success())
        }

        Commands::Verify { input } => {
            let source = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let password = read_password(false)?;

            let exporter = VaultExporter::new(MemoryVault::new(), ExportConfig::default());
            let outcome = exporter.verify(source, password);
            match outcome.summary() {
                Some(summary) if outcome.is_success() => {
                    println!("Archive OK: {} entries verified", summary.restored_count());
                    for skipped in &summary.skipped {
                        println!("  skipped: {} ({})", skipped.path, skipped.reason);
                    }
                }
                _ => println!("{}", outcome),
            }
            Ok(outcome.is_success())
        }

        Commands::Inspect { input, json } => {
            let source = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let listing = container::inspect(source)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("Format version: {}", listing.version);
                println!("Iterations:     {}", listing.iterations);
                println!("Salt:           {}", listing.salt);
                println!("{:-<60}", "");
                for entry in &listing.entries {
                    let status = if entry.sealed { "" } else { " [abandoned]" };
                    println!("{:>12}  {}{}", entry.plaintext_len, entry.path, status);
                }
                println!("{:-<60}", "");
                match listing.declared_count {
                    Some(count) => println!("{} entries (end marker present)", count),
                    None => println!("{} entries (archive incomplete)", listing.entries.len()),
                }
            }
            Ok(true)
        }

        Commands::List { vault } => {
            let scan = DirectoryVault::new(&vault).scan()?;
            if scan.files.is_empty() {
                println!("No files in vault");
            } else {
                println!("Files in vault ({}):", scan.files.len());
                for file in &scan.files {
                    println!(
                        "{:>12}  {:<12}  {}",
                        file.size,
                        strategy_for(file.path.as_str()).as_str(),
                        file.path
                    );
                }
            }
            for failure in &scan.unlisted {
                println!("  not exportable: {} ({})", failure.path, failure.reason);
            }
            Ok(scan.unlisted.is_empty())
        }
    }
}
