//! Rotation state commands.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use roster_reconcile::{AssignmentPolicy, CategoryClass, RotationState, RotationStore};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    print_info, print_output, print_single, print_success, print_warning, OutputFormat,
};

use super::CommandContext;

/// Rotation state commands.
#[derive(Debug, Args)]
pub struct StateCommand {
    #[command(subcommand)]
    command: StateSubcommand,
}

#[derive(Debug, Subcommand)]
enum StateSubcommand {
    /// Show the stored cursors.
    Show,

    /// Overwrite one cursor, e.g. after a failed save.
    Set(SetCursorArgs),

    /// Import cursors from a legacy one-number-per-line counters file.
    ImportLegacy(ImportLegacyArgs),
}

#[derive(Debug, Args)]
struct SetCursorArgs {
    /// Category name.
    category: String,

    /// New cursor value.
    cursor: u64,
}

#[derive(Debug, Args)]
struct ImportLegacyArgs {
    /// Counters file.
    file: PathBuf,

    /// Category of each line, in order. Defaults to the rotating categories,
    /// in configured order.
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,
}

impl StateCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            StateSubcommand::Show => show_state(ctx),
            StateSubcommand::Set(args) => set_cursor(ctx, args),
            StateSubcommand::ImportLegacy(args) => import_legacy(ctx, args),
        }
    }
}

/// Cursor for table display.
#[derive(Debug, Serialize, Tabled)]
struct CursorView {
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "CURSOR")]
    cursor: u64,
    #[tabled(rename = "NEXT")]
    next_owner: String,
}

fn cursor_views(state: &RotationState, policy: &AssignmentPolicy) -> Vec<CursorView> {
    state
        .iter()
        .map(|(category, cursor)| CursorView {
            category: category.to_string(),
            cursor,
            next_owner: policy
                .next_owner(category, state)
                .unwrap_or("-")
                .to_string(),
        })
        .collect()
}

fn show_state(ctx: CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    let policy = config.build_policy()?;
    let store = ctx.store(&config);
    let state = store.load().context("Failed to load rotation state")?;

    print_output(&cursor_views(&state, &policy), ctx.format);
    print_info(&format!("State file: {}", store.path().display()));
    Ok(())
}

fn set_cursor(ctx: CommandContext, args: SetCursorArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let policy = config.build_policy()?;
    let store = ctx.store(&config);

    let category = args.category.trim();
    if policy.rule(category).is_none() {
        print_warning(&format!("{category:?} has no policy rule."));
    }

    let mut state = store.load().context("Failed to load rotation state")?;
    let previous = state.cursor(category);
    state.set(category, args.cursor);
    store.save(&state).context("Failed to save rotation state")?;

    print_success(&format!(
        "Cursor for {category:?} set to {} (was {previous}).",
        args.cursor
    ));
    Ok(())
}

/// Tracked categories that rotate, in configured order.
fn rotating_categories(categories: &[String], policy: &AssignmentPolicy) -> Vec<String> {
    categories
        .iter()
        .filter(|c| policy.classify(c) == CategoryClass::Rotating)
        .cloned()
        .collect()
}

fn import_legacy(ctx: CommandContext, args: ImportLegacyArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let categories = if args.categories.is_empty() {
        rotating_categories(&config.categories, &config.build_policy()?)
    } else {
        args.categories
    };
    if categories.is_empty() {
        anyhow::bail!("No rotating categories configured; pass --categories");
    }

    let contents = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let imported = RotationState::from_legacy_counters(&contents, &categories)
        .with_context(|| format!("Invalid counters file {}", args.file.display()))?;

    let store = ctx.store(&config);
    let mut state = store.load().context("Failed to load rotation state")?;
    for (category, cursor) in imported.iter() {
        state.set(category, cursor);
    }
    store.save(&state).context("Failed to save rotation state")?;

    match ctx.format {
        OutputFormat::Json => print_single(&state),
        OutputFormat::Table => print_success(&format!(
            "Imported {} cursors into {}.",
            categories.len(),
            store.path().display()
        )),
    }
    Ok(())
}
