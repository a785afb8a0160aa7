// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use wayfarer_rs::wayfarer::config::Config;
use wayfarer_rs::wayfarer::persistence::{QueryCache, SqliteCheckpointStore, SqliteQueryCache};
use wayfarer_rs::wayfarer::session::{SessionManager, SessionStatus};
use wayfarer_rs::wayfarer::travel::{compile_travel_graph, LookupCache};
use wayfarer_rs::wayfarer::workflow::loader::WorkflowLoader;
use wayfarer_rs::wayfarer::workflow::state::HumanDecision;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new planning session and drive it
    Plan {
        /// Free-form travel request
        query: String,
    },
    /// Execute exactly one node of an active session
    Step { session: String },
    /// Continue a session, optionally with a human decision
    Resume {
        session: String,

        /// accept, keep or terminate (1, 2 or 3)
        #[arg(short, long)]
        decision: Option<HumanDecision>,
    },
    /// Stop an active or suspended session
    Terminate { session: String },
    /// List sessions that can be resumed
    List,
    /// Show the latest checkpoint of a session
    Show { session: String },
    /// Restart a failed session from a checkpoint
    Recover {
        session: String,

        /// Checkpoint step to restart from (defaults to the latest)
        #[arg(short, long)]
        step: Option<u64>,
    },
    /// Show lookup cache statistics
    Cache {
        /// Delete expired entries first
        #[arg(long)]
        purge: bool,
    },
}

fn report(session_id: &str, status: SessionStatus) {
    println!("Session {}: {}", session_id, status);
    match status {
        SessionStatus::SuspendedForHuman => println!(
            "Awaiting a decision: wayfarer resume {} --decision accept|keep|terminate",
            session_id
        ),
        SessionStatus::Active => println!("Continue with: wayfarer resume {}", session_id),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let definition = match &config.graph_file {
        Some(path) => WorkflowLoader::new().load_graph(path)?,
        None => WorkflowLoader::travel_planner()?,
    };
    let store = SqliteCheckpointStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening checkpoint store {}", config.database_url))?;
    let cache: Arc<dyn QueryCache> = Arc::new(SqliteQueryCache::new(store.pool().clone()));
    let lookups = config
        .cache
        .enabled
        .then(|| LookupCache::new(Arc::clone(&cache), config.cache.ttl()));
    let graph = compile_travel_graph(definition, config.output_dir.clone(), lookups).await?;
    let manager = SessionManager::new(Arc::new(graph), Arc::new(store), config.limits());

    match args.command {
        Commands::Plan { query } => {
            let session_id = manager.create_session(&query).await?;
            println!("Created session {}", session_id);
            let status = manager.run(&session_id).await?;
            report(&session_id, status);
        }
        Commands::Step { session } => {
            let status = manager.step(&session).await?;
            let loaded = manager.inspect(&session).await?;
            println!(
                "Step {} done, next: {}",
                loaded.checkpoint.step_seq, loaded.checkpoint.next_node_id
            );
            report(&session, status);
        }
        Commands::Resume { session, decision } => {
            let status = manager.resume(&session, decision).await?;
            report(&session, status);
        }
        Commands::Terminate { session } => {
            manager.terminate(&session).await?;
            println!("Session {} terminated", session);
        }
        Commands::List => {
            let sessions = manager.list_resumable().await?;
            if sessions.is_empty() {
                println!("No resumable sessions");
            }
            for s in sessions {
                println!(
                    "{}  {:<20} step {:<3} next {:<20} {}  \"{}\"",
                    s.session_id,
                    s.status.as_str(),
                    s.step_seq,
                    s.next_node_id,
                    s.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    s.initial_query
                );
                println!("    {}", s.digest);
            }
        }
        Commands::Show { session } => {
            let loaded = manager.inspect(&session).await?;
            println!(
                "Session {} ({}), step {}, next {}",
                loaded.session.id,
                loaded.session.status,
                loaded.checkpoint.step_seq,
                loaded.checkpoint.next_node_id
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&loaded.checkpoint.state.to_json())?
            );
        }
        Commands::Cache { purge } => {
            if purge {
                let removed = cache.purge_expired().await?;
                println!("Removed {} expired entries", removed);
            }
            let stats = cache.stats().await?;
            println!(
                "Cache: {} entries ({} active, {} expired), {} hits",
                stats.total, stats.active, stats.expired, stats.hits
            );
        }
        Commands::Recover { session, step } => {
            let new_step = manager.recover(&session, step).await?;
            println!(
                "Session {} is active again at step {}; continue with: wayfarer resume {}",
                session, new_step, session
            );
        }
    }

    Ok(())
}
