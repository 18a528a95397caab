//! Reconciliation run orchestration.
//!
//! A run has two halves:
//!
//! - [`ReconciliationEngine::plan`] loads the cursors, pulls events, resolves
//!   owners, reads the ledger snapshot once and deduplicates. Nothing is
//!   written.
//! - [`ReconciliationEngine::commit`] appends the planned rows in one batch
//!   and, only if that succeeds, persists the advanced cursors.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dedup::{filter_new, LedgerSnapshot};
use crate::error::{ProviderError, RunError};
use crate::event::{EligibleEvent, LedgerRow};
use crate::ledger::Ledger;
use crate::policy::{AssignmentPolicy, OwnerResolution, OwnerScope, ResolvedBy, ResolvedEvent};
use crate::provider::{EventProvider, SourceGroup};
use crate::rotation::{RotationState, RotationStore};

/// What to reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub source_groups: Vec<SourceGroup>,
    pub categories: Vec<String>,
    pub score_threshold: f64,
    pub lookback_days: u32,
}

/// A row that will be appended, with how its owner was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRow {
    pub row: LedgerRow,
    pub resolution: OwnerResolution,
}

/// Counters gathered while planning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub events_seen: usize,
    pub skipped_existing: usize,
    pub skipped_in_batch: usize,
    pub unmapped: usize,

    /// Rows from overrides-only sources that had no override.
    pub missing_override: usize,

    /// Rows to append per category.
    pub by_category: BTreeMap<String, usize>,
}

/// Output of the planning half of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Rows in append order.
    pub rows: Vec<PlannedRow>,

    /// Cursors as loaded.
    pub base: RotationState,

    /// Cursors to persist once `rows` are recorded.
    pub staged: RotationState,

    pub stats: RunStats,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rows_appended: usize,
    pub events_seen: usize,
    pub skipped_existing: usize,
    pub skipped_in_batch: usize,
    pub unmapped: usize,
    pub missing_override: usize,

    /// Cursor steps taken per rotating category.
    pub advanced: BTreeMap<String, u64>,
}

impl RunReport {
    fn from_stats(stats: &RunStats) -> Self {
        Self {
            events_seen: stats.events_seen,
            skipped_existing: stats.skipped_existing,
            skipped_in_batch: stats.skipped_in_batch,
            unmapped: stats.unmapped,
            missing_override: stats.missing_override,
            ..Self::default()
        }
    }
}

/// Drives a reconciliation run against its three collaborators.
///
/// Runs must not overlap for the same ledger and rotation store.
pub struct ReconciliationEngine<P, L, S> {
    provider: P,
    ledger: L,
    store: S,
    policy: AssignmentPolicy,
}

impl<P, L, S> ReconciliationEngine<P, L, S>
where
    P: EventProvider,
    L: Ledger,
    S: RotationStore,
{
    pub fn new(provider: P, ledger: L, store: S, policy: AssignmentPolicy) -> Self {
        Self {
            provider,
            ledger,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &AssignmentPolicy {
        &self.policy
    }

    /// Plan and commit a run.
    pub async fn run(
        &self,
        config: &RunConfig,
        recorded_date: NaiveDate,
    ) -> Result<RunReport, RunError> {
        let plan = self.plan(config, recorded_date).await?;
        self.commit(plan).await
    }

    /// Work out what a run would record, without writing anything.
    pub async fn plan(
        &self,
        config: &RunConfig,
        recorded_date: NaiveDate,
    ) -> Result<RunPlan, RunError> {
        let base = self.store.load().map_err(RunError::RotationLoad)?;

        let events = self.collect_events(config).await?;
        let events_seen = events.len();

        let resolved: Vec<ResolvedEvent> = events
            .into_iter()
            .map(|(scope, event)| {
                let resolution = self.policy.resolve_owner(
                    event.category(),
                    event.source_id(),
                    scope,
                    &base,
                );
                ResolvedEvent { event, resolution }
            })
            .collect();

        let raw = self
            .ledger
            .read_existing()
            .await
            .map_err(RunError::LedgerRead)?;
        let snapshot = LedgerSnapshot::from_raw(&raw);
        debug!(
            rows = snapshot.rows(),
            ignored = snapshot.ignored(),
            "Read ledger snapshot"
        );

        let outcome = filter_new(resolved, &snapshot, |r| r.event.key());
        let mut kept = outcome.kept;
        let staged = self.policy.stage_rotation(&mut kept, &base);

        let mut stats = RunStats {
            events_seen,
            skipped_existing: outcome.skipped_existing,
            skipped_in_batch: outcome.skipped_in_batch,
            ..RunStats::default()
        };
        if stats.skipped_in_batch > 0 {
            warn!(
                count = stats.skipped_in_batch,
                "Duplicate events within one run dropped"
            );
        }

        let rows: Vec<PlannedRow> = kept
            .into_iter()
            .map(|ResolvedEvent { event, resolution }| {
                match resolution.resolved_by {
                    ResolvedBy::Unmapped => stats.unmapped += 1,
                    ResolvedBy::MissingOverride => stats.missing_override += 1,
                    _ => {}
                }
                *stats
                    .by_category
                    .entry(event.category().to_string())
                    .or_insert(0) += 1;
                PlannedRow {
                    row: LedgerRow::from_event(&event, &resolution.owner_name, recorded_date),
                    resolution,
                }
            })
            .collect();

        if stats.unmapped > 0 {
            warn!(
                count = stats.unmapped,
                "Rows in categories without a policy rule, recorded with placeholder owner"
            );
        }

        if stats.missing_override > 0 {
            warn!(
                count = stats.missing_override,
                "Rows from overrides-only sources without an override, recorded with placeholder owner"
            );
        }

        info!(
            events_seen,
            new_rows = rows.len(),
            skipped_existing = stats.skipped_existing,
            "Planned reconciliation"
        );

        Ok(RunPlan {
            rows,
            base,
            staged,
            stats,
        })
    }

    /// Record a plan: append its rows, then persist its cursors.
    ///
    /// An empty plan touches neither the ledger nor the store. If the append
    /// fails the store is not written.
    pub async fn commit(&self, plan: RunPlan) -> Result<RunReport, RunError> {
        let mut report = RunReport::from_stats(&plan.stats);

        if plan.is_empty() {
            info!("No new rows to record");
            return Ok(report);
        }

        let rows: Vec<LedgerRow> = plan.rows.iter().map(|p| p.row.clone()).collect();
        self.ledger
            .append_rows(&rows)
            .await
            .map_err(|source| RunError::LedgerAppend {
                rows: rows.len(),
                source,
            })?;
        info!(rows = rows.len(), "Appended rows to ledger");

        report.rows_appended = rows.len();
        report.advanced = plan.staged.advanced_since(&plan.base);

        if let Err(source) = self.store.save(&plan.staged) {
            return Err(RunError::RotationPersist {
                rows_appended: rows.len(),
                intended: plan.staged,
                source,
            });
        }

        for (category, steps) in &report.advanced {
            info!(
                category = %category,
                steps,
                cursor = plan.staged.cursor(category),
                "Advanced rotation"
            );
        }

        Ok(report)
    }

    /// Fetch events, each tagged with its group's owner scope.
    async fn collect_events(
        &self,
        config: &RunConfig,
    ) -> Result<Vec<(OwnerScope, EligibleEvent)>, RunError> {
        let mut events = Vec::new();

        for group in &config.source_groups {
            let sources = match self.provider.list_sources(group).await {
                Ok(sources) => sources,
                Err(ProviderError::NotFound(what)) => {
                    info!(group = %group.id(), what = %what, "Source group not found, skipping");
                    continue;
                }
                Err(source) => {
                    return Err(RunError::Sources {
                        group: group.id(),
                        source,
                    })
                }
            };
            debug!(group = %group.id(), sources = sources.len(), "Expanded source group");
            let scope = group.owner_scope();

            for source_id in &sources {
                let fetches = config.categories.iter().map(|category| {
                    self.provider.list_eligible(
                        source_id,
                        category,
                        config.score_threshold,
                        config.lookback_days,
                    )
                });
                let results = join_all(fetches).await;

                for (category, result) in config.categories.iter().zip(results) {
                    match result {
                        Ok(found) => {
                            debug!(
                                source_id = %source_id,
                                category = %category,
                                count = found.len(),
                                "Fetched eligible events"
                            );
                            events.extend(found.into_iter().map(|event| (scope, event)));
                        }
                        Err(ProviderError::NotFound(what)) => {
                            debug!(
                                source_id = %source_id,
                                category = %category,
                                what = %what,
                                "Category not found in source"
                            );
                        }
                        Err(source) => {
                            return Err(RunError::Provider {
                                source_id: source_id.clone(),
                                category: category.clone(),
                                source,
                            })
                        }
                    }
                }
            }
        }

        Ok(events)
    }
}
