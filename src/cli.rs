//! Command-line interface module for cloudtidy.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing
//! - Building a plan from a manifest and a taxonomy
//! - Executing a plan, live or as a dry run
//! - Undo and trash purge

use crate::audit::AuditLog;
use crate::config::{ConfigError, Settings};
use crate::dedupe::{Disposition, DuplicateResolver};
use crate::error::{Error, Result};
use crate::executor::{CancellationToken, ExecutionReport, ExecutorOptions, PlanExecutor};
use crate::manifest::{ManifestIndex, ReadOptions, read_manifest};
use crate::output::OutputFormatter;
use crate::plan::{Plan, PlanBuilder};
use crate::purge::TrashPurger;
use crate::review::{ReviewDecisions, apply_decisions};
use crate::taxonomy::{self, Taxonomy, TaxonomyMatcher};
use crate::undo::UndoManager;
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "cloudtidy", version, about = "Deduplicate and file cloud drive exports into one library")]
pub struct Cli {
    /// Configuration file (defaults to ./.cloudtidyrc.toml, then ~/.config/cloudtidy/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve duplicates, classify files and write a plan
    Plan(PlanArgs),
    /// Execute a plan written by `plan`
    Execute(ExecuteArgs),
    /// Revert executed actions recorded in the audit log
    Undo(UndoArgs),
    /// Permanently remove trashed files past the retention window
    Purge(PurgeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Manifest (.json, .jsonl or .tsv)
    #[arg(long)]
    pub manifest: PathBuf,

    /// Taxonomy (.json, .toml or .tsv); the built-in type categories if omitted
    #[arg(long)]
    pub taxonomy: Option<PathBuf>,

    /// Content signals extracted from documents (JSON)
    #[arg(long)]
    pub signals: Option<PathBuf>,

    /// Review decisions for near duplicates (JSON)
    #[arg(long)]
    pub decisions: Option<PathBuf>,

    /// Where duplicates.json, classifications.tsv, plan.json and plan.tsv go
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    #[arg(long)]
    pub trash_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    #[arg(long)]
    pub plan: PathBuf,

    /// Check every action without changing anything
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub audit_log: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct UndoArgs {
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    #[arg(long)]
    pub retention_days: Option<u32>,

    #[arg(long)]
    pub dry_run: bool,
}

/// Runs a parsed command line.
pub fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Plan(args) => build_plan(args, &settings).map(|_| ()),
        Command::Execute(args) => execute_plan(args, &settings, install_cancel_handler()).map(|_| ()),
        Command::Undo(args) => undo(args, &settings),
        Command::Purge(args) => purge(args, &settings),
    }
}

/// Builds the plan and writes all artifacts into `out_dir`.
pub fn build_plan(args: &PlanArgs, settings: &Settings) -> Result<Plan> {
    let mut settings = settings.clone();
    if let Some(base_dir) = &args.base_dir {
        settings.library.base_dir = base_dir.clone();
    }
    if let Some(trash_dir) = &args.trash_dir {
        settings.library.trash_dir = trash_dir.clone();
    }
    let working_dir = std::env::current_dir().map_err(|e| ConfigError::IoError(e.to_string()))?;
    settings.library.anchor(&working_dir);

    let records = read_manifest(
        &args.manifest,
        ReadOptions {
            sniff_mime: settings.library.sniff_mime,
        },
    )?;
    let index = ManifestIndex::load(records)?;

    let junk = settings.junk_filter()?;
    let mut resolution = DuplicateResolver::new(&settings.dedupe, &junk).resolve(&index);
    if let Some(path) = &args.decisions {
        let outcome = apply_decisions(&mut resolution, &ReviewDecisions::load(path)?);
        for ignored in &outcome.ignored {
            OutputFormatter::warning(&format!(
                "Ignored decision for {}: not awaiting review",
                ignored.display()
            ));
        }
    }

    let taxonomy = match &args.taxonomy {
        Some(path) => Taxonomy::load(path)?,
        None => Taxonomy::builtin(),
    };
    let signals = match &args.signals {
        Some(path) => taxonomy::read_signals(path)?,
        None => HashMap::new(),
    };

    let matcher = TaxonomyMatcher::new(&taxonomy, &settings.library.base_dir, &settings.naming);
    let kept = index
        .records()
        .map(|(_, r)| r)
        .filter(|r| resolution.disposition(&r.path) == Disposition::Keep);
    let classifications = matcher.classify_all(kept, &signals);

    let plan = PlanBuilder::new(&settings.library).build(&index, &resolution, &classifications);
    plan.validate()?;

    fs::create_dir_all(&args.out_dir).map_err(|e| output_error(&args.out_dir, e))?;
    let duplicates_path = args.out_dir.join("duplicates.json");
    let duplicates = serde_json::to_string_pretty(&resolution).map_err(|e| output_error(&duplicates_path, e))?;
    fs::write(&duplicates_path, duplicates).map_err(|e| output_error(&duplicates_path, e))?;
    let classifications_path = args.out_dir.join("classifications.tsv");
    taxonomy::write_classifications_tsv(&classifications_path, &classifications)
        .map_err(|e| output_error(&classifications_path, e))?;
    plan.save_json(&args.out_dir.join("plan.json"))?;
    plan.write_tsv(&args.out_dir.join("plan.tsv"))?;

    OutputFormatter::info(&format!("Read {} records from {}", index.len(), args.manifest.display()));
    OutputFormatter::resolution_report(&resolution.summary());
    OutputFormatter::plan_report(&plan);
    OutputFormatter::success(&format!("Plan written to {}", args.out_dir.join("plan.json").display()));
    Ok(plan)
}

/// Executes a saved plan. `cancellation` is checked between actions.
pub fn execute_plan(
    args: &ExecuteArgs,
    settings: &Settings,
    cancellation: CancellationToken,
) -> Result<ExecutionReport> {
    let plan = Plan::load_json(&args.plan)?;
    let audit = AuditLog::open(audit_path(&args.audit_log, settings))?;

    if args.dry_run {
        OutputFormatter::dry_run_notice("Checking actions; nothing will be changed.");
    }
    let progress = OutputFormatter::create_progress_bar(plan.actions.len() as u64);
    let options = ExecutorOptions {
        cancellation,
        progress: Some(progress.clone()),
        ..ExecutorOptions::from(&settings.executor)
    };

    let report = PlanExecutor::new(&audit, options).execute(&plan, args.dry_run)?;
    progress.finish_and_clear();

    OutputFormatter::execution_report(&report);
    if !args.dry_run && report.succeeded() > 0 {
        OutputFormatter::plain(&format!(
            "Audit log: {}. Use 'cloudtidy undo' to revert.",
            audit.path().display()
        ));
    }
    Ok(report)
}

fn undo(args: &UndoArgs, settings: &Settings) -> Result<()> {
    let audit = AuditLog::open(audit_path(&args.audit_log, settings))?;
    if args.dry_run {
        OutputFormatter::dry_run_notice("Nothing will be moved.");
    }
    let report = UndoManager::undo(&audit, args.dry_run)?;
    OutputFormatter::undo_report(&report, args.dry_run);
    Ok(())
}

fn purge(args: &PurgeArgs, settings: &Settings) -> Result<()> {
    let audit = AuditLog::open(audit_path(&args.audit_log, settings))?;
    let days = args.retention_days.unwrap_or(settings.purge.retention_days);
    if args.dry_run {
        OutputFormatter::dry_run_notice("Nothing will be removed.");
    }
    let report = TrashPurger::purge(
        &audit,
        chrono::Duration::days(i64::from(days)),
        chrono::Utc::now(),
        args.dry_run,
    )?;
    OutputFormatter::purge_report(&report, args.dry_run);
    Ok(())
}

fn audit_path<'a>(flag: &'a Option<PathBuf>, settings: &'a Settings) -> &'a Path {
    flag.as_deref().unwrap_or(&settings.library.audit_log)
}

fn output_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Output {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Cancels the run on Ctrl-C. The first signal stops after the current action.
fn install_cancel_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current action...");
        handler_token.cancel();
    }) {
        warn!("could not install Ctrl-C handler: {}", e);
    }
    token
}
