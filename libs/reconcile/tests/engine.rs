//! Integration tests for full reconciliation runs.
//!
//! The collaborators are in-memory fakes that record how they were called.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use roster_reconcile::{
    AssignmentPolicy, EligibleEvent, EventProvider, JsonFileStore, Ledger, LedgerError,
    LedgerRow, OwnerScope, PolicyConfig, ProviderError, ReconciliationEngine, RotationState, RotationStore,
    RotationStoreError, RuleConfig, RunConfig, RunError, SourceGroup, SourceId, UNKNOWN_OWNER,
};

const GROUP: u64 = 3299;
const ACCOUNT: u64 = 667;

fn event(subject: &str, category: &str, source: u64) -> EligibleEvent {
    EligibleEvent::new(subject, category, SourceId::from(source), Utc::now())
        .unwrap()
        .with_display_name(Some(format!("Student {subject}")))
        .with_contact_address(Some(format!("{}@example.edu", subject.to_lowercase())))
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
}

fn run_config(categories: &[&str]) -> RunConfig {
    RunConfig {
        source_groups: vec![SourceGroup::Blueprint { course_id: GROUP }],
        categories: categories.iter().map(|c| c.to_string()).collect(),
        score_threshold: 1.0,
        lookback_days: 30,
    }
}

fn policy() -> AssignmentPolicy {
    let mut config = PolicyConfig::default();
    config.categories.insert(
        "P1".to_string(),
        RuleConfig::Rotating {
            owners: vec!["A".to_string(), "B".to_string()],
        },
    );
    config.categories.insert(
        "P2".to_string(),
        RuleConfig::Fixed {
            owner: "Fixed Owner".to_string(),
        },
    );
    config
        .source_overrides
        .insert("6191".to_string(), "Override Owner".to_string());
    AssignmentPolicy::build(&config, ["3299"]).unwrap()
}

#[derive(Default)]
struct FakeProvider {
    sources: HashMap<String, Vec<SourceId>>,
    events: HashMap<(SourceId, String), Vec<EligibleEvent>>,
    unavailable: bool,
}

impl FakeProvider {
    fn with_source(mut self, group: impl ToString, source: u64) -> Self {
        self.sources
            .entry(group.to_string())
            .or_default()
            .push(SourceId::from(source));
        self
    }

    fn with_events(mut self, source: u64, category: &str, events: Vec<EligibleEvent>) -> Self {
        self.events
            .entry((SourceId::from(source), category.to_string()))
            .or_default()
            .extend(events);
        self
    }
}

#[async_trait]
impl EventProvider for FakeProvider {
    async fn list_sources(&self, group: &SourceGroup) -> Result<Vec<SourceId>, ProviderError> {
        self.sources
            .get(&group.id())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(group.id()))
    }

    async fn list_eligible(
        &self,
        source: &SourceId,
        category: &str,
        _min_score: f64,
        _lookback_days: u32,
    ) -> Result<Vec<EligibleEvent>, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::Unavailable("connection refused".to_string()));
        }
        self.events
            .get(&(source.clone(), category.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(category.to_string()))
    }
}

#[derive(Default)]
struct LedgerInner {
    rows: Vec<Vec<String>>,
    appended: Vec<LedgerRow>,
    append_calls: usize,
    fail_append: bool,
}

#[derive(Clone, Default)]
struct FakeLedger(Arc<Mutex<LedgerInner>>);

impl FakeLedger {
    fn with_row(self, subject: &str, category: &str) -> Self {
        self.0.lock().unwrap().rows.push(
            ["2024-01-01", "Old", subject, "old@example.edu", "Someone", category]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        );
        self
    }

    fn failing(self) -> Self {
        self.0.lock().unwrap().fail_append = true;
        self
    }

    fn appended(&self) -> Vec<LedgerRow> {
        self.0.lock().unwrap().appended.clone()
    }

    fn append_calls(&self) -> usize {
        self.0.lock().unwrap().append_calls
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn read_existing(&self) -> Result<Vec<Vec<String>>, LedgerError> {
        Ok(self.0.lock().unwrap().rows.clone())
    }

    async fn append_rows(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        let mut inner = self.0.lock().unwrap();
        inner.append_calls += 1;
        if inner.fail_append {
            return Err(LedgerError::Unavailable("quota exceeded".to_string()));
        }
        for row in rows {
            inner.rows.push(row.to_cells());
            inner.appended.push(row.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
struct StoreInner {
    state: RotationState,
    saves: usize,
    fail_save: bool,
}

#[derive(Clone, Default)]
struct FakeStore(Arc<Mutex<StoreInner>>);

impl FakeStore {
    fn with_cursor(self, category: &str, cursor: u64) -> Self {
        self.0.lock().unwrap().state.set(category, cursor);
        self
    }

    fn failing(self) -> Self {
        self.0.lock().unwrap().fail_save = true;
        self
    }

    fn state(&self) -> RotationState {
        self.0.lock().unwrap().state.clone()
    }

    fn saves(&self) -> usize {
        self.0.lock().unwrap().saves
    }
}

impl RotationStore for FakeStore {
    fn load(&self) -> Result<RotationState, RotationStoreError> {
        Ok(self.0.lock().unwrap().state.clone())
    }

    fn save(&self, state: &RotationState) -> Result<(), RotationStoreError> {
        let mut inner = self.0.lock().unwrap();
        if inner.fail_save {
            return Err(RotationStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only filesystem",
            )));
        }
        inner.state = state.clone();
        inner.saves += 1;
        Ok(())
    }
}

fn owners_of(rows: &[LedgerRow]) -> Vec<(&str, &str)> {
    rows.iter()
        .map(|r| (r.subject_id.as_str(), r.owner.as_str()))
        .collect()
}

#[tokio::test]
async fn test_existing_key_is_not_appended() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P2", vec![event("S1", "P2", 10), event("S2", "P2", 10)]);
    let ledger = FakeLedger::default().with_row("S1", "P2");
    let engine =
        ReconciliationEngine::new(provider, ledger.clone(), FakeStore::default(), policy());

    let report = engine.run(&run_config(&["P2"]), today()).await.unwrap();

    assert_eq!(report.rows_appended, 1);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(owners_of(&ledger.appended()), vec![("S2", "Fixed Owner")]);
}

#[tokio::test]
async fn test_rotation_assigns_round_robin_and_persists_cursor() {
    let provider = FakeProvider::default().with_source(GROUP, 10).with_events(
        10,
        "P1",
        vec![
            event("S1", "P1", 10),
            event("S2", "P1", 10),
            event("S3", "P1", 10),
        ],
    );
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let report = engine.run(&run_config(&["P1"]), today()).await.unwrap();

    assert_eq!(
        owners_of(&ledger.appended()),
        vec![("S1", "A"), ("S2", "B"), ("S3", "A")]
    );
    assert_eq!(store.state().cursor("P1"), 3);
    assert_eq!(report.advanced.get("P1"), Some(&3));
}

#[tokio::test]
async fn test_unmapped_category_is_recorded_with_placeholder_owner() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P3", vec![event("S1", "P3", 10)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default().with_cursor("P1", 4);
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let report = engine.run(&run_config(&["P3"]), today()).await.unwrap();

    assert_eq!(report.rows_appended, 1);
    assert_eq!(report.unmapped, 1);
    assert!(report.advanced.is_empty());
    assert_eq!(owners_of(&ledger.appended()), vec![("S1", UNKNOWN_OWNER)]);
    assert_eq!(store.state().cursor("P1"), 4);
    assert_eq!(store.state().cursor("P3"), 0);
}

#[tokio::test]
async fn test_failed_append_leaves_state_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotation.json");
    let file_store = JsonFileStore::new(&path);
    let mut initial = RotationState::new();
    initial.set("P1", 5);
    file_store.save(&initial).unwrap();
    let before = std::fs::read(&path).unwrap();

    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10), event("S2", "P1", 10)]);
    let ledger = FakeLedger::default().failing();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), file_store, policy());

    let err = engine.run(&run_config(&["P1"]), today()).await.unwrap_err();

    assert!(matches!(err, RunError::LedgerAppend { rows: 2, .. }));
    assert!(!err.needs_operator());
    assert_eq!(ledger.append_calls(), 1);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_rerun_over_same_window_appends_nothing() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10), event("S2", "P1", 10)])
        .with_events(10, "P2", vec![event("S1", "P2", 10)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());
    let config = run_config(&["P1", "P2"]);

    let first = engine.run(&config, today()).await.unwrap();
    let second = engine.run(&config, today()).await.unwrap();

    assert_eq!(first.rows_appended, 3);
    assert_eq!(second.rows_appended, 0);
    assert_eq!(second.skipped_existing, 3);
    assert_eq!(ledger.append_calls(), 1);
    assert_eq!(store.saves(), 1);
    assert_eq!(store.state().cursor("P1"), 2);
}

#[tokio::test]
async fn test_no_new_rows_skips_ledger_and_store() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P2", vec![event("S1", "P2", 10)]);
    let ledger = FakeLedger::default().with_row("S1", "P2");
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let report = engine.run(&run_config(&["P2"]), today()).await.unwrap();

    assert_eq!(report.rows_appended, 0);
    assert_eq!(ledger.append_calls(), 0);
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn test_duplicates_do_not_consume_rotation_slots() {
    let provider = FakeProvider::default().with_source(GROUP, 10).with_events(
        10,
        "P1",
        vec![
            event("S1", "P1", 10),
            event("S2", "P1", 10),
            event("S2", "P1", 10),
            event("S3", "P1", 10),
        ],
    );
    let ledger = FakeLedger::default().with_row("S1", "P1");
    let store = FakeStore::default().with_cursor("P1", 1);
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let report = engine.run(&run_config(&["P1"]), today()).await.unwrap();

    assert_eq!(report.skipped_existing, 1);
    assert_eq!(report.skipped_in_batch, 1);
    assert_eq!(owners_of(&ledger.appended()), vec![("S2", "B"), ("S3", "A")]);
    assert_eq!(store.state().cursor("P1"), 3);
}

#[tokio::test]
async fn test_rotation_continues_across_runs() {
    let ledger = FakeLedger::default();
    let store = FakeStore::default();

    let first = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10)]);
    ReconciliationEngine::new(first, ledger.clone(), store.clone(), policy())
        .run(&run_config(&["P1"]), today())
        .await
        .unwrap();

    let second = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10), event("S9", "P1", 10)]);
    ReconciliationEngine::new(second, ledger.clone(), store.clone(), policy())
        .run(&run_config(&["P1"]), today())
        .await
        .unwrap();

    assert_eq!(owners_of(&ledger.appended()), vec![("S1", "A"), ("S9", "B")]);
    assert_eq!(store.state().cursor("P1"), 2);
}

#[tokio::test]
async fn test_persist_failure_reports_intended_cursors() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10), event("S2", "P1", 10)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default().with_cursor("P1", 7).failing();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let err = engine.run(&run_config(&["P1"]), today()).await.unwrap_err();

    assert!(err.needs_operator());
    match err {
        RunError::RotationPersist {
            rows_appended,
            intended,
            ..
        } => {
            assert_eq!(rows_appended, 2);
            assert_eq!(intended.cursor("P1"), 9);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ledger.appended().len(), 2);
    assert_eq!(store.state().cursor("P1"), 7);
}

#[tokio::test]
async fn test_missing_categories_and_groups_are_skipped() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P2", vec![event("S1", "P2", 10)]);
    let ledger = FakeLedger::default();
    let engine =
        ReconciliationEngine::new(provider, ledger.clone(), FakeStore::default(), policy());
    let mut config = run_config(&["P1", "P2", "P3"]);
    config
        .source_groups
        .push(SourceGroup::Blueprint { course_id: 4182 });

    let report = engine.run(&config, today()).await.unwrap();

    assert_eq!(report.rows_appended, 1);
    assert_eq!(report.events_seen, 1);
}

#[tokio::test]
async fn test_provider_failure_aborts_before_ledger() {
    let mut provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10)]);
    provider.unavailable = true;
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let err = engine.run(&run_config(&["P1"]), today()).await.unwrap_err();

    assert!(matches!(err, RunError::Provider { .. }));
    assert_eq!(ledger.append_calls(), 0);
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn test_source_override_does_not_advance_rotation() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_source(GROUP, 6191)
        .with_events(10, "P1", vec![event("S1", "P1", 10)])
        .with_events(6191, "P1", vec![event("S2", "P1", 6191)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    engine.run(&run_config(&["P1"]), today()).await.unwrap();

    assert_eq!(
        owners_of(&ledger.appended()),
        vec![("S1", "A"), ("S2", "Override Owner")]
    );
    assert_eq!(store.state().cursor("P1"), 1);
}

#[tokio::test]
async fn test_plan_writes_nothing() {
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_events(10, "P1", vec![event("S1", "P1", 10), event("S2", "P1", 10)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());

    let plan = engine.plan(&run_config(&["P1"]), today()).await.unwrap();

    assert_eq!(plan.rows.len(), 2);
    assert_eq!(plan.staged.cursor("P1"), 2);
    assert_eq!(plan.base.cursor("P1"), 0);
    assert_eq!(plan.stats.by_category, BTreeMap::from([("P1".to_string(), 2)]));
    assert_eq!(plan.rows[0].row.recorded_date, today());
    assert_eq!(ledger.append_calls(), 0);
    assert_eq!(store.saves(), 0);
}

fn unassociated(owner_scope: OwnerScope) -> SourceGroup {
    SourceGroup::Unassociated {
        account_id: ACCOUNT,
        search_terms: vec!["Flex".to_string()],
        owner_scope,
    }
}

#[tokio::test]
async fn test_unassociated_course_without_override_skips_rotation() {
    let account = format!("account:{ACCOUNT}");
    let provider = FakeProvider::default()
        .with_source(GROUP, 10)
        .with_source(&account, 777)
        .with_source(&account, 6191)
        .with_events(777, "P1", vec![event("S1", "P1", 777), event("S2", "P1", 777)])
        .with_events(6191, "P1", vec![event("S3", "P1", 6191)])
        .with_events(10, "P1", vec![event("S4", "P1", 10)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());
    let mut config = run_config(&["P1"]);
    config
        .source_groups
        .push(unassociated(OwnerScope::OverridesOnly));

    let report = engine.run(&config, today()).await.unwrap();

    assert_eq!(
        owners_of(&ledger.appended()),
        vec![
            ("S4", "A"),
            ("S1", UNKNOWN_OWNER),
            ("S2", UNKNOWN_OWNER),
            ("S3", "Override Owner"),
        ]
    );
    assert_eq!(report.missing_override, 2);
    assert_eq!(report.unmapped, 0);
    assert_eq!(store.state().cursor("P1"), 1);
    assert_eq!(report.advanced.get("P1"), Some(&1));
}

#[tokio::test]
async fn test_unassociated_course_can_use_category_rules() {
    let account = format!("account:{ACCOUNT}");
    let provider = FakeProvider::default()
        .with_source(&account, 777)
        .with_events(777, "P1", vec![event("S1", "P1", 777), event("S2", "P1", 777)]);
    let ledger = FakeLedger::default();
    let store = FakeStore::default();
    let engine = ReconciliationEngine::new(provider, ledger.clone(), store.clone(), policy());
    let config = RunConfig {
        source_groups: vec![unassociated(OwnerScope::CategoryRules)],
        ..run_config(&["P1"])
    };

    engine.run(&config, today()).await.unwrap();

    assert_eq!(
        owners_of(&ledger.appended()),
        vec![("S1", "A"), ("S2", "B")]
    );
    assert_eq!(store.state().cursor("P1"), 2);
}
