use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tabshelf_api::ShelfApi;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "shelf")]
#[command(about = "TabShelf operator CLI")]
struct Cli {
    #[arg(long, env = "TABSHELF_DB", default_value = "./tabshelf.sqlite3")]
    db: PathBuf,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    SchemaVersion,
    Migrate(MigrateArgs),
    IntegrityCheck,
    RepairOrders,
    Backup(BackupArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long)]
    out: PathBuf,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

/// Stdout carries the JSON payload, so log events go to stderr.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    let api = ShelfApi::new(cli.db);
    run(cli.command, &api)
}

fn run(command: Command, api: &ShelfApi) -> Result<()> {
    match command {
        Command::SchemaVersion => run_schema_version(api),
        Command::Migrate(args) => run_migrate(&args, api),
        Command::IntegrityCheck => run_integrity_check(api),
        Command::RepairOrders => run_repair_orders(api),
        Command::Backup(args) => run_backup(&args, api),
    }
}

fn run_schema_version(api: &ShelfApi) -> Result<()> {
    let status = api.schema_status()?;
    emit_json(json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_migrate(args: &MigrateArgs, api: &ShelfApi) -> Result<()> {
    let result = api.migrate(args.dry_run)?;
    emit_json(serde_json::to_value(&result).context("failed to serialize migration result")?)
}

fn run_integrity_check(api: &ShelfApi) -> Result<()> {
    let report = api.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_repair_orders(api: &ShelfApi) -> Result<()> {
    let summary = api.repair_orders()?;
    info!(
        scopes = summary.scopes_repaired,
        rows = summary.rows_updated,
        "order repair finished"
    );
    emit_json(serde_json::to_value(&summary).context("failed to serialize repair summary")?)
}

fn run_backup(args: &BackupArgs, api: &ShelfApi) -> Result<()> {
    api.migrate(false)?;
    api.backup(&args.out)?;
    emit_json(json!({
        "backup_path": args.out,
        "status": "ok"
    }))
}
