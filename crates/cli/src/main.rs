use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use colored::*;
use runledger_core::config::RunledgerConfig;
use runledger_core::events::{
    AgentEvent, AuditEntry, AuditFilter, AuditStore, EventStore, EventType, TrajectoryFilter,
};
use runledger_core::ids::TenantId;
use runledger_core::plan::DagError;
use runledger_core::{Context, SqliteStore};
use time::format_description::well_known::Rfc3339;

mod cli_args;
mod plan_doc;
mod tracing;

use cli_args::{CliArgs, Commands, PageArgs, PlanCommands};
use plan_doc::PlanDocument;
use tracing::setup_logging;

fn load_config(args: &CliArgs) -> Result<RunledgerConfig> {
    let mut config = match &args.config {
        Some(path) => RunledgerConfig::load(path)?,
        None => RunledgerConfig::default(),
    };
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &RunledgerConfig) -> Result<SqliteStore> {
    SqliteStore::open(config)
        .with_context(|| format!("failed to open {}", config.database.path.display()))
}

fn tenant_context(tenant: Option<TenantId>) -> Result<Context> {
    tenant
        .map(Context::new)
        .ok_or_else(|| anyhow!("--tenant (or RUNLEDGER_TENANT) is required for this command"))
}

fn timestamp(at: time::OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn print_event(event: &AgentEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let mut line = format!(
        "{:>6}  {}  {}",
        event.version,
        timestamp(event.created_at),
        event.event_type.to_string().cyan()
    );
    if let Some(tool) = &event.tool_name {
        line.push_str(&format!("  tool={tool}"));
    }
    if let Some(model) = &event.model {
        line.push_str(&format!("  model={model}"));
    }
    if event.tokens_in.is_some() || event.tokens_out.is_some() {
        line.push_str(&format!(
            "  tokens={}/{}",
            event.tokens_in.unwrap_or(0),
            event.tokens_out.unwrap_or(0)
        ));
    }
    println!("{line}");
    Ok(())
}

fn print_audit(entry: &AuditEntry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(entry)?);
        return Ok(());
    }
    let mut line = format!(
        "{}  {}  project={}",
        timestamp(entry.created_at),
        entry.action.yellow(),
        entry.project_id
    );
    if let Some(run) = entry.run_id {
        line.push_str(&format!("  run={run}"));
    }
    if let Some(agent) = entry.agent_id {
        line.push_str(&format!("  agent={agent}"));
    }
    println!("{line}");
    Ok(())
}

fn print_footer(page: &PageArgs, total: u64, cursor: Option<&str>, has_more: bool) {
    if page.json {
        return;
    }
    match (has_more, cursor) {
        (true, Some(cursor)) => eprintln!("{} {total} total, next cursor {cursor}", "--".dimmed()),
        _ => eprintln!("{} {total} total", "--".dimmed()),
    }
}

async fn trajectory(
    store: &SqliteStore,
    cx: &Context,
    run: runledger_core::ids::RunId,
    types: Vec<String>,
    page: PageArgs,
) -> Result<()> {
    let filter = TrajectoryFilter {
        types: types.into_iter().map(EventType::from).collect(),
        ..TrajectoryFilter::default()
    };
    let mut cursor = page.cursor.clone();
    loop {
        let result = store
            .load_trajectory(cx, run, filter.clone(), cursor.clone(), page.limit)
            .await
            .with_context(|| format!("failed to load trajectory of run {run}"))?;
        for event in &result.events {
            print_event(event, page.json)?;
        }
        if !(page.all && result.has_more) {
            print_footer(&page, result.total, result.cursor.as_deref(), result.has_more);
            return Ok(());
        }
        cursor = result.cursor;
    }
}

async fn audit(store: &SqliteStore, cx: &Context, filter: AuditFilter, page: PageArgs) -> Result<()> {
    let mut cursor = page.cursor.clone();
    loop {
        let result = store
            .load_audit(cx, filter.clone(), cursor.clone(), page.limit)
            .await
            .context("failed to load audit trail")?;
        for entry in &result.entries {
            print_audit(entry, page.json)?;
        }
        if !(page.all && result.has_more) {
            print_footer(&page, result.total, result.cursor.as_deref(), result.has_more);
            return Ok(());
        }
        cursor = result.cursor;
    }
}

fn validate_plan(path: &std::path::Path) -> Result<bool> {
    let doc = PlanDocument::load(path)?;
    match doc.rounds()? {
        Ok(table) => {
            println!(
                "{} {} ({} steps, {} rounds, up to {} at once)",
                "ok".green().bold(),
                doc.name,
                doc.steps.len(),
                table.rounds.len(),
                table.peak_concurrency()
            );
            for (round, steps) in &table.rounds {
                println!("  round {round:>3}  {}", steps.join(", "));
            }
            Ok(true)
        }
        Err(DagError::Cycle(path)) => {
            println!("{} dependency cycle", "invalid".red().bold());
            println!("  {}", path.join(" -> "));
            Ok(false)
        }
        Err(err) => {
            println!("{} {err}", "invalid".red().bold());
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let args = CliArgs::parse();

    match &args.command {
        Commands::Init => {
            let config = load_config(&args)?;
            open_store(&config)?;
            ::tracing::info!(path = %config.database.path.display(), "schema ready");
            println!("initialised {}", config.database.path.display());
        }
        Commands::Plan {
            command: PlanCommands::Validate { file },
        } => {
            if !validate_plan(file)? {
                std::process::exit(1);
            }
        }
        Commands::Trajectory { run, types, page } => {
            let cx = tenant_context(args.tenant)?;
            let store = open_store(&load_config(&args)?)?;
            trajectory(&store, &cx, *run, types.clone(), page.clone()).await?;
        }
        Commands::Stats { run } => {
            let cx = tenant_context(args.tenant)?;
            let store = open_store(&load_config(&args)?)?;
            let stats = store
                .trajectory_stats(&cx, *run)
                .await
                .with_context(|| format!("failed to compute stats for run {run}"))?;
            println!("{:<12} {}", "events".bold(), stats.total_events);
            println!("{:<12} {} ms", "duration".bold(), stats.duration_ms);
            println!("{:<12} {}", "tool calls".bold(), stats.tool_calls);
            println!("{:<12} {}", "errors".bold(), stats.errors);
            println!("{:<12} {} in / {} out", "tokens".bold(), stats.tokens_in, stats.tokens_out);
            println!("{:<12} ${:.4}", "cost".bold(), stats.cost_usd);
            for (kind, count) in &stats.by_type {
                println!("  {kind:<20} {count}");
            }
        }
        Commands::Audit {
            project,
            run,
            agent,
            action,
            page,
        } => {
            let cx = tenant_context(args.tenant)?;
            let store = open_store(&load_config(&args)?)?;
            let filter = AuditFilter {
                project_id: *project,
                run_id: *run,
                agent_id: *agent,
                action: action.clone(),
                ..AuditFilter::default()
            };
            audit(&store, &cx, filter, page.clone()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runledger_core::entities::{ProjectFields, ProjectRepository};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args_for(db: PathBuf) -> CliArgs {
        CliArgs::try_parse_from(["runledger", "init", "--db", db.to_str().unwrap()]).unwrap()
    }

    #[tokio::test]
    async fn init_creates_a_usable_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        let config = load_config(&args_for(path.clone())).unwrap();
        assert_eq!(config.database.path, path);

        open_store(&config).unwrap();
        assert!(path.exists());

        let store = open_store(&config).unwrap();
        let cx = Context::new(TenantId::new());
        store
            .create_project(&cx, ProjectFields::named("cli"))
            .await
            .unwrap();
    }

    #[test]
    fn tenant_is_required_for_reads() {
        assert!(tenant_context(None).is_err());
        assert!(tenant_context(Some(TenantId::new())).is_ok());
    }

    #[test]
    fn validate_reports_cycles_without_failing() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"name": "ok", "steps": [{"key": "a"}, {"key": "b", "depends_on": ["a"]}]}"#,
        )
        .unwrap();
        assert!(validate_plan(&good).unwrap());

        let looped = dir.path().join("loop.json");
        std::fs::write(
            &looped,
            r#"{"name": "loop", "steps": [{"key": "a", "depends_on": ["b"]}, {"key": "b", "depends_on": ["a"]}]}"#,
        )
        .unwrap();
        assert!(!validate_plan(&looped).unwrap());

        assert!(validate_plan(&dir.path().join("missing.json")).is_err());
    }
}
