//! Run and plan commands.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Args;
use roster_reconcile::{
    PlannedRow, ResolvedBy, RotationState, RunConfig, RunPlan, RunReport, RunStats,
    LEDGER_DATE_FORMAT,
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    print_info, print_output, print_single, print_success, print_warning, OutputFormat,
};

use super::CommandContext;

/// Per-invocation overrides of the configured run settings.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOverrides {
    /// Look back this many days instead of the configured window.
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Require this score instead of the configured threshold.
    #[arg(long)]
    score_threshold: Option<f64>,

    /// Date written into recorded rows (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
}

impl RunOverrides {
    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(days) = self.lookback_days {
            config.lookback_days = days;
        }
        if let Some(threshold) = self.score_threshold {
            config.score_threshold = threshold;
        }
        config
    }

    fn recorded_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Record new rows.
#[derive(Debug, Args)]
pub struct RunCommand {
    #[command(flatten)]
    overrides: RunOverrides,
}

/// Preview a run.
#[derive(Debug, Args)]
pub struct PlanCommand {
    #[command(flatten)]
    overrides: RunOverrides,
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let config = ctx.load_config()?;
        let run_config = self.overrides.apply(config.run_config());
        let engine = ctx.engine(&config)?;

        let report = engine
            .run(&run_config, self.overrides.recorded_date())
            .await?;

        print_report(&report, ctx.format);
        Ok(())
    }
}

impl PlanCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let config = ctx.load_config()?;
        let run_config = self.overrides.apply(config.run_config());
        let engine = ctx.engine(&config)?;

        let plan = engine
            .plan(&run_config, self.overrides.recorded_date())
            .await?;

        print_plan(&plan, ctx.format);
        Ok(())
    }
}

/// Planned row for table display.
#[derive(Debug, Serialize, Tabled)]
struct PlannedRowView {
    #[tabled(rename = "DATE")]
    date: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "SUBJECT")]
    subject: String,
    #[tabled(rename = "CONTACT")]
    contact: String,
    #[tabled(rename = "OWNER")]
    owner: String,
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "VIA")]
    via: &'static str,
}

impl From<&PlannedRow> for PlannedRowView {
    fn from(planned: &PlannedRow) -> Self {
        let row = &planned.row;
        Self {
            date: row.recorded_date.format(LEDGER_DATE_FORMAT).to_string(),
            name: row.display_name.clone(),
            subject: row.subject_id.clone(),
            contact: row.contact_address.clone(),
            owner: row.owner.clone(),
            category: row.category.clone(),
            via: resolved_by_label(planned.resolution.resolved_by),
        }
    }
}

fn resolved_by_label(resolved_by: ResolvedBy) -> &'static str {
    match resolved_by {
        ResolvedBy::SourceOverride => "override",
        ResolvedBy::Fixed => "fixed",
        ResolvedBy::Rotating => "rotation",
        ResolvedBy::Unmapped => "unmapped",
        ResolvedBy::MissingOverride => "no override",
    }
}

/// Cursor movement for table display.
#[derive(Debug, Serialize, Tabled)]
struct CursorMoveView {
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "FROM")]
    from: u64,
    #[tabled(rename = "TO")]
    to: u64,
}

fn cursor_moves(base: &RotationState, staged: &RotationState) -> Vec<CursorMoveView> {
    staged
        .advanced_since(base)
        .into_keys()
        .map(|category| CursorMoveView {
            from: base.cursor(&category),
            to: staged.cursor(&category),
            category,
        })
        .collect()
}

#[derive(Serialize)]
struct PlanJson<'a> {
    rows: &'a [PlannedRow],
    stats: &'a RunStats,
    cursors: &'a RotationState,
}

fn print_plan(plan: &RunPlan, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_single(&PlanJson {
            rows: &plan.rows,
            stats: &plan.stats,
            cursors: &plan.staged,
        });
        return;
    }

    let rows: Vec<PlannedRowView> = plan.rows.iter().map(PlannedRowView::from).collect();
    print_output(&rows, format);

    let moves = cursor_moves(&plan.base, &plan.staged);
    if !moves.is_empty() {
        println!();
        print_output(&moves, format);
    }

    print_stats(&plan.stats);
    print_info(&format!("Would record {} rows.", plan.rows.len()));
}

fn print_report(report: &RunReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_single(report);
        return;
    }

    if report.rows_appended == 0 {
        print_info("No new rows to record.");
    } else {
        print_success(&format!("Recorded {} rows.", report.rows_appended));
    }

    for (category, steps) in &report.advanced {
        print_info(&format!("Rotation for {category:?} advanced by {steps}."));
    }
    print_info(&format!(
        "{} events seen, {} already recorded, {} duplicates in this run.",
        report.events_seen, report.skipped_existing, report.skipped_in_batch
    ));
    if report.unmapped > 0 {
        print_warning(&format!(
            "{} rows recorded with a placeholder owner; add policy rules for their categories.",
            report.unmapped
        ));
    }
    if report.missing_override > 0 {
        print_warning(&format!(
            "{} rows recorded with a placeholder owner; add source overrides for their courses.",
            report.missing_override
        ));
    }
}

fn print_stats(stats: &RunStats) {
    print_info(&format!(
        "{} events seen, {} already recorded, {} duplicates in this run.",
        stats.events_seen, stats.skipped_existing, stats.skipped_in_batch
    ));
    if stats.unmapped > 0 {
        print_warning(&format!(
            "{} rows would get a placeholder owner; add policy rules for their categories.",
            stats.unmapped
        ));
    }
    if stats.missing_override > 0 {
        print_warning(&format!(
            "{} rows would get a placeholder owner; add source overrides for their courses.",
            stats.missing_override
        ));
    }
}
