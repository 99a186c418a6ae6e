//! OpenTimestamps CLI client

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ots_client::{Calendar, ClientConfig, HttpCalendar, OtsClient, ProofStorage};
use ots_core::{DetachedTimestampFile, Verification};
use ots_types::{hash_stream, DigestAlg, Op};

#[derive(Parser)]
#[command(name = "ots")]
#[command(about = "OpenTimestamps client: stamp, upgrade and verify timestamp proofs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "OTS_CONFIG")]
    config: Option<PathBuf>,

    /// Calendar URL, repeatable; replaces the configured calendars
    #[arg(short, long = "calendar")]
    calendars: Vec<String>,

    /// Storage directory
    #[arg(short = 'd', long, default_value = ".ots")]
    storage_dir: PathBuf,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timestamp files, writing a `.ots` proof next to each
    Stamp {
        /// Files to timestamp
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Upgrade proofs in place with attestations from the calendars
    Upgrade {
        /// Proof files to upgrade
        #[arg(required = true)]
        proofs: Vec<PathBuf>,
    },

    /// Verify a proof against the file it timestamps
    Verify {
        /// Proof file
        proof: PathBuf,

        /// Timestamped file (defaults to the proof path without `.ots`)
        #[arg(short, long)]
        target: Option<PathBuf>,
    },

    /// Show the contents of a proof
    Info {
        /// Proof file
        proof: PathBuf,
    },

    /// List all stored proofs
    List,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(cli: &Cli, config: &ClientConfig) -> Result<OtsClient> {
    let mut client = OtsClient::new(config)?;

    if !cli.calendars.is_empty() {
        let calendars = cli
            .calendars
            .iter()
            .map(|url| {
                HttpCalendar::new(url.as_str(), config.timeout())
                    .map(|calendar| Arc::new(calendar) as Arc<dyn Calendar>)
            })
            .collect::<ots_client::Result<Vec<_>>>()?;
        client = client
            .with_calendars(calendars.clone())
            .with_calendar_override(calendars);
    }

    Ok(client)
}

fn read_proof(path: &Path) -> Result<DetachedTimestampFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    DetachedTimestampFile::from_bytes(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn proof_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".ots");
    PathBuf::from(name)
}

fn print_status(file: &DetachedTimestampFile) {
    if file.timestamp().is_complete() {
        println!("Status:    complete");
    } else {
        println!("Status:    pending");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ClientConfig::load(cli.config.as_deref())?;
    let client = build_client(&cli, &config)?;
    let storage = ProofStorage::open(&cli.storage_dir)?;

    match &cli.command {
        Commands::Stamp { files } => {
            let mut stamped = Vec::with_capacity(files.len());
            for path in files {
                let target = proof_path(path);
                if target.exists() {
                    bail!("{} already exists", target.display());
                }
                let reader = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
                stamped.push((target, DetachedTimestampFile::from_stream(DigestAlg::Sha256, reader)?));
            }

            let proofs: Vec<DetachedTimestampFile> = stamped.iter().map(|(_, file)| file.clone()).collect();
            let answered = client.stamp(&proofs).await?;

            for (target, file) in &stamped {
                std::fs::write(target, file.to_bytes()?)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                storage.store(file)?;
                println!("Digest:    {}", hex::encode(file.digest()));
                println!("Proof:     {}", target.display());
            }
            println!("Submitted to {} calendar(s)", answered);
        }

        Commands::Upgrade { proofs } => {
            for path in proofs {
                let file = read_proof(path)?;
                let changed = client.upgrade(&file).await?;

                if changed {
                    let mut backup = path.as_os_str().to_owned();
                    backup.push(".bak");
                    std::fs::copy(path, &backup)
                        .with_context(|| format!("Failed to back up {}", path.display()))?;
                    std::fs::write(path, file.to_bytes()?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    storage.store(&file)?;
                    println!("Upgraded:  {}", path.display());
                } else {
                    println!("Unchanged: {}", path.display());
                }
                print_status(&file);
            }
        }

        Commands::Verify { proof, target } => {
            let file = read_proof(proof)?;
            let target = match target {
                Some(target) => target.clone(),
                None => proof.with_extension(""),
            };
            let alg = match file.hash_op() {
                Op::Digest(alg) => *alg,
                other => bail!("Unsupported hash operation {}", other),
            };

            let reader = File::open(&target).with_context(|| format!("Failed to open {}", target.display()))?;
            let digest = hash_stream(alg, reader)?;

            println!("Assuming target filename is {}", target.display());
            let verification = client.verify(&file, &digest).await?;
            println!("{}", verification);
            if let Verification::Pending { .. } = verification {
                println!("Run `ots upgrade` once the calendars have anchored the proof");
            }
        }

        Commands::Info { proof } => {
            let file = read_proof(proof)?;
            print!("{}", file);
        }

        Commands::List => {
            let proofs = storage.list()?;

            if proofs.is_empty() {
                println!("No stored proofs");
            } else {
                println!("Stored proofs ({})", proofs.len());
                println!();
                for (digest, file) in proofs {
                    println!("Digest:    {}", hex::encode(digest));
                    println!("Hash:      {}", file.hash_op());
                    print_status(&file);
                    println!();
                }
            }
        }
    }

    Ok(())
}
