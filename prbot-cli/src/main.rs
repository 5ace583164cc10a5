use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use prbot_core::{score, Assignment, Reviewer, ReviewerBalancer, ReviewerStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// prbot: manage the reviewer pool used for pull-request assignment
#[derive(Parser, Debug)]
#[command(name = "prbot")]
#[command(about = "Manage the prbot reviewer pool", long_about = None)]
struct Cli {
    /// Path to the reviewer database
    #[arg(long, global = true, env = "PRBOT_DB", default_value = "reviewers.db")]
    db: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List reviewers, least loaded first
    List,
    /// Add a reviewer, or update an existing one
    Add(AddArgs),
    /// Remove a reviewer from the pool
    Remove(RemoveArgs),
    /// Set every reviewer's workload to zero
    Reset,
    /// Print the score of a change
    Score(ScoreArgs),
    /// Credit a score to the least-loaded reviewer
    Assign(AssignArgs),
}

#[derive(Parser, Debug)]
struct AddArgs {
    /// GitHub login of the reviewer
    name: String,

    /// Chat handle used to mention the reviewer
    contact: String,

    /// Workload to store. Defaults to 0 for a new reviewer and to the
    /// current workload for an existing one
    #[arg(long)]
    workload: Option<u64>,
}

#[derive(Parser, Debug)]
struct RemoveArgs {
    name: String,
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    /// Lines added
    #[arg(long)]
    additions: Option<u64>,

    /// Lines deleted
    #[arg(long)]
    deletions: Option<u64>,
}

#[derive(Parser, Debug)]
struct AssignArgs {
    score: u64,

    /// Reviewer who must not be chosen, typically the PR author
    #[arg(long)]
    exclude: Option<String>,
}

fn format_pool(pool: &[Reviewer]) -> String {
    if pool.is_empty() {
        return "No reviewers in the pool".to_string();
    }

    let width = pool.iter().map(|r| r.name.len()).max().unwrap_or(0).max(4);
    let mut out = format!("{:<width$}  {:>8}  CONTACT\n", "NAME", "WORKLOAD");
    for reviewer in pool {
        out.push_str(&format!(
            "{:<width$}  {:>8}  {}\n",
            reviewer.name, reviewer.workload, reviewer.contact_handle
        ));
    }
    out.trim_end().to_string()
}

/// Workload the assignee ended up with, after any rebalance.
fn final_workload(assignment: &Assignment) -> u64 {
    assignment
        .pool
        .iter()
        .find(|r| r.name == assignment.assignee.name)
        .map(|r| r.workload)
        .unwrap_or_else(|| assignment.assignee.workload.saturating_add(assignment.score))
}

fn format_assignment(assignment: &Assignment) -> String {
    let mut out = format!(
        "Assigned {} (@{}): workload {} -> {}",
        assignment.assignee.name,
        assignment.assignee.contact_handle,
        assignment.assignee.workload,
        final_workload(assignment)
    );
    if assignment.rebalanced {
        out.push_str("\nPool rebalanced");
    }
    out
}

fn assignment_json(assignment: &Assignment) -> serde_json::Value {
    serde_json::json!({
        "name": assignment.assignee.name,
        "contact_handle": assignment.assignee.contact_handle,
        "workload_before": assignment.assignee.workload,
        "workload_after": final_workload(assignment),
        "score": assignment.score,
        "rebalanced": assignment.rebalanced,
        "pool": assignment.pool,
    })
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    SqliteStore::new(db)
        .with_context(|| format!("Failed to open reviewer database {}", db.display()))
}

async fn run_list(store: &SqliteStore, json: bool) -> Result<String> {
    let mut pool = store.read_all().await?;
    pool.sort_by_key(|r| r.workload);

    if json {
        Ok(serde_json::to_string_pretty(&pool)?)
    } else {
        Ok(format_pool(&pool))
    }
}

async fn run_add(store: &SqliteStore, args: AddArgs) -> Result<String> {
    let workload = match args.workload {
        Some(workload) => workload,
        None => store
            .read_all()
            .await?
            .into_iter()
            .find(|r| r.name == args.name)
            .map(|r| r.workload)
            .unwrap_or(0),
    };
    let reviewer = Reviewer::new(args.name, workload, args.contact);
    let message = format!(
        "Saved {} (@{}) with workload {}",
        reviewer.name, reviewer.contact_handle, reviewer.workload
    );
    store.upsert(reviewer).await?;
    Ok(message)
}

async fn run_remove(store: &SqliteStore, args: RemoveArgs) -> Result<String> {
    if store.remove(&args.name).await? {
        Ok(format!("Removed {}", args.name))
    } else {
        Err(anyhow!("No reviewer named '{}'", args.name))
    }
}

async fn run_reset(store: &SqliteStore) -> Result<String> {
    let count = store.reset_workloads().await?;
    Ok(format!("Reset workload of {} reviewers", count))
}

fn run_score(args: ScoreArgs, json: bool) -> Result<String> {
    let value = score(args.additions, args.deletions);
    if json {
        Ok(serde_json::json!({
            "additions": args.additions,
            "deletions": args.deletions,
            "score": value,
        })
        .to_string())
    } else {
        Ok(value.to_string())
    }
}

async fn run_assign(store: SqliteStore, args: AssignArgs, json: bool) -> Result<String> {
    let balancer = ReviewerBalancer::new(Arc::new(store));
    let assignment = balancer.assign(args.score, args.exclude.as_deref()).await?;

    if json {
        Ok(serde_json::to_string_pretty(&assignment_json(&assignment))?)
    } else {
        Ok(format_assignment(&assignment))
    }
}

async fn run(cli: Cli) -> Result<String> {
    let Cli { db, json, command } = cli;

    match command {
        Commands::Score(args) => run_score(args, json),
        Commands::List => {
            let store = open_store(&db)?;
            run_list(&store, json).await
        }
        Commands::Add(args) => {
            let store = open_store(&db)?;
            run_add(&store, args).await
        }
        Commands::Remove(args) => {
            let store = open_store(&db)?;
            run_remove(&store, args).await
        }
        Commands::Reset => {
            let store = open_store(&db)?;
            run_reset(&store).await
        }
        Commands::Assign(args) => run_assign(open_store(&db)?, args, json).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = run(cli).await?;
    println!("{}", output);
    Ok(())
}
