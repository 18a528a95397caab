//! Policy commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use roster_reconcile::{
    AssignmentPolicy, PolicyRule, RotationState, RotationStore, UNKNOWN_OWNER,
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{display_option, print_info, print_output, print_single, OutputFormat};

use super::CommandContext;

/// Policy commands.
#[derive(Debug, Args)]
pub struct PolicyCommand {
    #[command(subcommand)]
    command: PolicySubcommand,
}

#[derive(Debug, Subcommand)]
enum PolicySubcommand {
    /// Show each category's rule and who gets the next row.
    Show,
}

impl PolicyCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            PolicySubcommand::Show => show_policy(ctx),
        }
    }
}

/// Category rule for table display.
#[derive(Debug, Serialize, Tabled)]
struct RuleView {
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "OWNERS")]
    owners: String,
    #[tabled(rename = "CURSOR", display = "display_option")]
    cursor: Option<u64>,
    #[tabled(rename = "NEXT")]
    next_owner: String,
}

#[derive(Debug, Serialize, Tabled)]
struct OverrideView {
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "OWNER")]
    owner: String,
}

#[derive(Serialize)]
struct PolicyJson {
    categories: Vec<RuleView>,
    source_overrides: Vec<OverrideView>,
}

fn rule_views(
    policy: &AssignmentPolicy,
    categories: &[String],
    state: &RotationState,
) -> Vec<RuleView> {
    categories
        .iter()
        .map(|category| {
            let next_owner = policy
                .next_owner(category, state)
                .unwrap_or(UNKNOWN_OWNER)
                .to_string();

            match policy.rule(category) {
                Some(PolicyRule::Fixed { owner }) => RuleView {
                    category: category.clone(),
                    kind: "fixed",
                    owners: owner.clone(),
                    cursor: None,
                    next_owner,
                },
                Some(PolicyRule::Conditional { owner, matched }) => RuleView {
                    category: category.clone(),
                    kind: "conditional",
                    owners: match matched {
                        Some(member) => format!("{owner} (via {member})"),
                        None => format!("{owner} (fallback)"),
                    },
                    cursor: None,
                    next_owner,
                },
                Some(PolicyRule::Rotating { owners }) => RuleView {
                    category: category.clone(),
                    kind: "rotating",
                    owners: owners.join(", "),
                    cursor: Some(state.cursor(category)),
                    next_owner,
                },
                None => RuleView {
                    category: category.clone(),
                    kind: "unmapped",
                    owners: "-".to_string(),
                    cursor: None,
                    next_owner,
                },
            }
        })
        .collect()
}

fn show_policy(ctx: CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    let policy = config.build_policy()?;
    let state = ctx
        .store(&config)
        .load()
        .context("Failed to load rotation state")?;

    // Tracked categories first, then rules for anything else.
    let mut categories = config.categories.clone();
    for (category, _) in policy.rules() {
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
    }

    let rules = rule_views(&policy, &categories, &state);
    let overrides: Vec<OverrideView> = policy
        .source_overrides()
        .map(|(source, owner)| OverrideView {
            source: source.to_string(),
            owner: owner.to_string(),
        })
        .collect();

    match ctx.format {
        OutputFormat::Json => print_single(&PolicyJson {
            categories: rules,
            source_overrides: overrides,
        }),
        OutputFormat::Table => {
            print_output(&rules, ctx.format);
            if overrides.is_empty() {
                print_info("No source overrides.");
            } else {
                println!();
                print_output(&overrides, ctx.format);
            }
        }
    }

    Ok(())
}
