//! pgbranch - inspect and manipulate branch-versioned records

mod config;

use std::io::Write;

use anyhow::Context;
use clap::{Parser, Subcommand};
use store::retry::retry_on_serialization_failure;
use store::{BranchStore, RetryPolicy, database};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pgbranch")]
#[command(about = "Branch-versioned record store on PostgreSQL", long_about = None)]
struct Cli {
    /// Branch to bind to (overrides store.branch)
    #[arg(short, long, global = true, env = "PGBRANCH_BRANCH")]
    branch: Option<String>,
    /// Records table, optionally schema-qualified (overrides store.table)
    #[arg(short, long, global = true)]
    table: Option<String>,
    /// Retries on serialization failure (overrides retry.max_retries)
    #[arg(long, global = true)]
    retries: Option<u8>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the records table if it does not exist
    Init,
    /// Store a value under file/key on the bound branch
    Save {
        file: String,
        key: String,
        /// Value to store, taken as UTF-8 bytes
        data: String,
    },
    /// Print the value of file/key on the bound branch
    Read { file: String, key: String },
    /// Delete every record of a branch
    DeleteBranch {
        #[arg(id = "target_branch", value_name = "BRANCH")]
        branch: String,
    },
    /// Delete every record of a branch with the given key
    DeleteKey {
        #[arg(id = "target_branch", value_name = "BRANCH")]
        branch: String,
        key: String,
    },
    /// Move the bound branch into TARGET, replacing TARGET's records
    Merge { target: String },
    /// Replace the bound branch with a copy of SOURCE
    Replace { source: String },
    /// List the records of a branch (default: the bound branch)
    Records {
        #[arg(id = "target_branch", value_name = "BRANCH")]
        branch: Option<String>,
    },
    /// List branches with their record counts
    Branches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let mut config = config::CliConfig::load().context("Failed to load config")?;
    if let Some(branch) = cli.branch {
        config.store.branch = branch;
    }
    if let Some(table) = cli.table {
        config.store.table = table;
    }
    if let Some(retries) = cli.retries {
        config.retry.max_retries = retries;
    }

    let db = database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = BranchStore::from_config(db, &config.store)
        .await
        .context("Failed to open branch store")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    run(cli.command, &store, &cancel, &config.retry).await
}

async fn run(
    command: Commands,
    store: &BranchStore,
    cancel: &CancellationToken,
    retry: &RetryPolicy,
) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            info!(table = %store.table(), "Records table ready");
        }
        Commands::Save { file, key, data } => {
            store.save(&file, &key, data.as_bytes()).await?;
        }
        Commands::Read { file, key } => {
            let data = store.read(&file, &key).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Commands::DeleteBranch { branch } => {
            let deleted = retry_on_serialization_failure(retry, || {
                store.delete_branch(cancel, &branch)
            })
            .await?;
            println!("deleted {deleted} records from {branch}");
        }
        Commands::DeleteKey { branch, key } => {
            let deleted = retry_on_serialization_failure(retry, || {
                store.delete_branch_key(cancel, &branch, &key)
            })
            .await?;
            println!("deleted {deleted} records with key {key} from {branch}");
        }
        Commands::Merge { target } => {
            let info =
                retry_on_serialization_failure(retry, || store.merge_to(cancel, &target)).await?;
            println!(
                "moved {} records from {} to {} ({} overwritten)",
                info.moved, info.source, info.target, info.overwritten
            );
        }
        Commands::Replace { source } => {
            let info =
                retry_on_serialization_failure(retry, || store.replace_from(cancel, &source))
                    .await?;
            println!(
                "copied {} records from {} to {} ({} discarded)",
                info.copied, info.source, info.target, info.discarded
            );
        }
        Commands::Records { branch } => {
            let branch = branch.unwrap_or_else(|| store.branch().to_string());
            for record in store.records(&branch).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    record.id,
                    record.file_name,
                    record.key,
                    record.data.map_or(0, |d| d.len()),
                    record.date_create
                );
            }
        }
        Commands::Branches => {
            for branch in store.branches().await? {
                println!("{}\t{}", branch.name, branch.records);
            }
        }
    }

    Ok(())
}
