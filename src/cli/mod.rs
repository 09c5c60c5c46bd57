// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::chain::{GapFiller, GapFinder, SystemClock, TipSetIndexer, Walker, Watcher, WatcherConfig};
use crate::model::Version;
use crate::node::NodeApi;
use crate::storage::Database;
use crate::tasks::{Cancel, ALL_TASKS};

/// Chain indexer for Filecoin-like ledgers.
#[derive(Parser)]
#[command(name = "canopy", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub db: DbOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct DbOpts {
    /// Database connection string; may reference environment variables.
    #[arg(long, default_value = "postgres://localhost:5432/postgres")]
    pub db: String,

    /// Schema that holds the indexer tables.
    #[arg(long, default_value = "public")]
    pub schema: String,

    /// Reporter name recorded in processing reports.
    #[arg(long, default_value = "canopy")]
    pub name: String,

    #[arg(long, default_value_t = 10)]
    pub pool_size: u32,

    /// Emit plain inserts instead of upserts; primary-key collisions are
    /// then recorded as skips.
    #[arg(long)]
    pub no_upsert: bool,
}

impl DbOpts {
    pub fn open(&self) -> anyhow::Result<Database> {
        Ok(Database::new(
            &self.db,
            self.pool_size,
            &self.name,
            &self.schema,
            !self.no_upsert,
        )?)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply or revert schema migrations.
    Migrate {
        /// Target schema version, e.g. `1.1`; defaults to the latest.
        #[arg(long)]
        to: Option<String>,
    },

    /// Index the chain.
    Run {
        /// Maximum wall-clock seconds a tipset's tasks may take.
        #[arg(long, default_value_t = crate::clock::EPOCH_DURATION_SECONDS as u64)]
        window: u64,

        /// Comma-separated task names; defaults to all tasks.
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,

        #[command(subcommand)]
        command: RunCommand,
    },

    /// Find or fill holes in the processing reports.
    Gap {
        #[command(subcommand)]
        command: GapCommand,
    },
}

#[derive(Subcommand)]
pub enum RunCommand {
    /// Walk a closed height range backward from the current head.
    Walk {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Follow live head changes with a confidence lag.
    Watch {
        #[arg(long, default_value_t = 5)]
        confidence: usize,
        #[arg(long, default_value_t = 16)]
        head_buffer_size: usize,
    },
}

#[derive(Subcommand)]
pub enum GapCommand {
    Find {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,
    },
    Fill {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
}

/// Dispatches a parsed command. The chain lens is supplied by the embedding
/// application; the bare binary can only run database-side commands.
pub async fn execute(cli: Cli, node: Option<Arc<dyn NodeApi>>) -> anyhow::Result<()> {
    match cli.command {
        Command::Migrate { to } => {
            let db = cli.db.open()?;
            match to {
                Some(v) => {
                    let version: Version = v
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid version: {}", e))?;
                    db.migrate_to_version(version).await?;
                }
                None => db.migrate_to_latest().await?,
            }
            Ok(())
        }

        Command::Run {
            window,
            tasks,
            command,
        } => {
            let node = node.context("no chain lens configured for this binary")?;
            let db = Arc::new(cli.db.open()?);
            db.connect().await?;

            let tasks = selected_tasks(&tasks)?;
            let indexer = Arc::new(TipSetIndexer::new(
                node.clone(),
                db.clone(),
                Duration::from_secs(window),
                &cli.db.name,
                &tasks,
            )?);
            let cancel = Cancel::new();

            match command {
                RunCommand::Walk { from, to } => {
                    let head = node.chain_head().await?;
                    let walker = Walker::new(indexer, from, to);
                    walker.walk_chain(node.as_ref(), head, &cancel).await?;
                }
                RunCommand::Watch {
                    confidence,
                    head_buffer_size,
                } => {
                    let watcher = Watcher::new(
                        node.clone(),
                        indexer,
                        WatcherConfig {
                            confidence,
                            head_buffer_size,
                            ..WatcherConfig::default()
                        },
                    );
                    watcher.run(&cancel).await?;
                }
            }
            Ok(())
        }

        Command::Gap { command } => match command {
            GapCommand::Find { from, to, tasks } => {
                let db = Arc::new(cli.db.open()?);
                db.connect().await?;
                let tasks = selected_tasks(&tasks)?;
                let finder = GapFinder::new(
                    db,
                    Arc::new(SystemClock),
                    &cli.db.name,
                    from,
                    to,
                    &tasks,
                );
                let gaps = finder.find().await?;
                println!("found {} gaps", gaps.len());
                Ok(())
            }
            GapCommand::Fill { from, to } => {
                let node = node.context("no chain lens configured for this binary")?;
                let db = Arc::new(cli.db.open()?);
                db.connect().await?;
                let indexer = Arc::new(TipSetIndexer::new(
                    node.clone(),
                    db.clone(),
                    Duration::from_secs(60),
                    &cli.db.name,
                    ALL_TASKS,
                )?);
                let filler = GapFiller::new(
                    node,
                    indexer,
                    db,
                    Arc::new(SystemClock),
                    &cli.db.name,
                    from,
                    to,
                );
                let filled = filler.fill(&Cancel::new()).await?;
                println!("filled {} gapped heights", filled);
                Ok(())
            }
        },
    }
}

fn selected_tasks(tasks: &[String]) -> anyhow::Result<Vec<&'static str>> {
    if tasks.is_empty() {
        return Ok(ALL_TASKS.to_vec());
    }
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        let known = ALL_TASKS
            .iter()
            .find(|t| **t == task.as_str())
            .with_context(|| format!("unknown task: {}", task))?;
        out.push(*known);
    }
    Ok(out)
}
