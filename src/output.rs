//! Output formatting and styling module.
//!
//! Provides a centralized interface for all terminal reports: colored
//! status lines, progress bars and summary tables. Diagnostics go through
//! `tracing` instead; this module is for what the user asked to see.

use crate::dedupe::ResolutionSummary;
use crate::executor::{ExecutionReport, Outcome};
use crate::plan::{ActionKind, Plan};
use crate::purge::PurgeReport;
use crate::undo::UndoReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars for execution
/// - Reports for every command
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use cloudtidy::output::OutputFormatter;
    /// OutputFormatter::success("Plan written");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar for plan execution.
    ///
    /// ```no_run
    /// use cloudtidy::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }

    /// Prints a two-column table of counts, sorted by label, with a total row.
    pub fn summary_table(title: &str, label: &str, counts: &BTreeMap<String, usize>) {
        Self::header(title);

        let width = counts.keys().map(|name| name.len()).max().unwrap_or(0).max(label.len());
        println!("{:<width$} | {}", label.bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (name, count) in counts {
            println!("{:<width$} | {}", name, count.to_string().green(), width = width);
        }
        println!("{}", "-".repeat(width + 10));
        let total: usize = counts.values().sum();
        println!(
            "{:<width$} | {}",
            "Total".bold(),
            total.to_string().green().bold(),
            width = width
        );
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    pub fn resolution_report(summary: &ResolutionSummary) {
        Self::header("DUPLICATES");
        println!("  Exact duplicate groups: {}", summary.exact_groups);
        println!("  Near duplicate groups:  {}", summary.near_groups);
        println!("  Junk files:             {}", summary.junk);
        println!("  Files to delete:        {}", summary.to_delete.to_string().red());
        println!("  Files needing review:   {}", summary.to_review.to_string().yellow());
        println!("  Reclaimable:            {}", format_bytes(summary.reclaimable_bytes));
    }

    pub fn plan_report(plan: &Plan) {
        let summary = plan.summary();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for action in plan.actions.iter().filter(|a| a.kind == ActionKind::Move) {
            let category = action.category.clone().unwrap_or_default();
            *by_category.entry(category).or_insert(0) += 1;
        }
        if !by_category.is_empty() {
            Self::summary_table("DESTINATIONS", "Category", &by_category);
        }

        Self::header("PLAN");
        println!("  Moves:   {}", summary.moves.to_string().green());
        println!("  Deletes: {}", summary.deletes.to_string().red());
        println!("  Skips:   {}", summary.skips);
        if summary.needs_review > 0 {
            Self::warning(&format!("{} files need review before they can be resolved", summary.needs_review));
        }
        if summary.low_confidence > 0 {
            Self::warning(&format!("{} files classified with low confidence", summary.low_confidence));
        }
    }

    pub fn execution_report(report: &ExecutionReport) {
        Self::header(if report.dry_run { "DRY RUN RESULT" } else { "EXECUTION RESULT" });
        let succeeded = if report.dry_run { "Would apply" } else { "Applied" };
        println!("  {:<13} {}", format!("{}:", succeeded), report.succeeded().to_string().green());
        println!("  {:<13} {}", "Failed:", report.failed().to_string().red());
        println!("  {:<13} {}", "Skipped:", report.skipped());
        if report.not_attempted() > 0 {
            println!("  {:<13} {}", "Not attempted:", report.not_attempted().to_string().yellow());
        }

        for outcome in report.outcomes.iter().filter(|o| o.outcome == Outcome::Failed) {
            Self::error(&format!(
                "{} {}: {}",
                outcome.action.kind,
                outcome.action.source_path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }

        let review: Vec<_> = report.review_items().collect();
        if !review.is_empty() {
            Self::header("NEEDS REVIEW");
            for item in review {
                println!("  - {}", item.action.source_path.display());
                println!("    {}", item.action.reason.dimmed());
            }
        }

        if report.cancelled {
            Self::warning("Run was cancelled; remaining actions were not attempted.");
        }
    }

    pub fn undo_report(report: &UndoReport, dry_run: bool) {
        Self::header(if dry_run { "UNDO (DRY RUN)" } else { "UNDO" });
        println!("  Restored: {}", report.restored_files.len().to_string().green());
        for backup in &report.backups {
            println!("  Backed up conflicting file to {}", backup.display());
        }
        if !report.skipped_files.is_empty() {
            println!("  Skipped: {}", report.skipped_files.len());
            for (path, reason) in &report.skipped_files {
                println!("    - {}: {}", path.display(), reason);
            }
        }
        if !report.failed_restores.is_empty() {
            println!("  Failed: {}", report.failed_restores.len().to_string().red());
            for (path, reason) in &report.failed_restores {
                eprintln!("    - {}: {}", path.display(), reason);
            }
        }
    }

    pub fn purge_report(report: &PurgeReport, dry_run: bool) {
        Self::header(if dry_run { "PURGE (DRY RUN)" } else { "PURGE" });
        println!(
            "  Purged:   {} ({})",
            report.purged.len().to_string().green(),
            format_bytes(report.reclaimed_bytes)
        );
        println!("  Retained: {}", report.retained);
        if !report.missing.is_empty() {
            println!("  Missing:  {}", report.missing.len());
        }
        for (path, reason) in &report.failed {
            Self::error(&format!("{}: {}", path.display(), reason));
        }
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
