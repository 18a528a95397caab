//! Owner assignment policy.
//!
//! The policy table is built once from static configuration. Resolution is a
//! pure lookup: it never touches rotation state, it only reads the current
//! cursor. Cursors move later, after the rows are recorded.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::event::{EligibleEvent, SourceId};
use crate::rotation::RotationState;

/// Owner recorded for categories without a rule.
pub const UNKNOWN_OWNER: &str = "Unknown Instructor";

/// A category rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    /// Always the same owner.
    Fixed { owner: String },

    /// First choice whose `when_present` member is in the reference set,
    /// else `fallback`.
    Conditional {
        choices: Vec<ConditionalChoice>,
        fallback: String,
    },

    /// Round-robin over `owners`.
    Rotating { owners: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalChoice {
    pub when_present: String,
    pub owner: String,
}

/// Policy configuration: category rules plus per-source overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub categories: BTreeMap<String, RuleConfig>,

    /// Source id -> owner. Wins over any category rule.
    #[serde(default)]
    pub source_overrides: BTreeMap<String, String>,
}

/// A rule after construction-time evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    Fixed {
        owner: String,
    },

    /// A conditional rule, already evaluated. `matched` is the reference
    /// member that selected the owner, if any.
    Conditional {
        owner: String,
        matched: Option<String>,
    },

    Rotating {
        owners: Vec<String>,
    },
}

impl PolicyRule {
    pub fn class(&self) -> CategoryClass {
        match self {
            Self::Fixed { .. } | Self::Conditional { .. } => CategoryClass::Fixed,
            Self::Rotating { .. } => CategoryClass::Rotating,
        }
    }
}

/// Classification of a category under the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryClass {
    Fixed,
    Rotating,
    Unmapped,
}

/// Which rules may pick an owner for events from a source group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerScope {
    /// Source overrides, then the category rules.
    #[default]
    CategoryRules,

    /// Source overrides only. Anything else gets [`UNKNOWN_OWNER`] and never
    /// takes a rotation slot.
    OverridesOnly,
}

/// Which part of the policy produced an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    SourceOverride,
    Fixed,
    Rotating,
    Unmapped,

    /// Overrides-only source with no override entry.
    MissingOverride,
}

/// Result of resolving an owner for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerResolution {
    pub owner_name: String,

    /// Set when recording the row must advance this category's cursor.
    pub rotation_category: Option<String>,

    pub resolved_by: ResolvedBy,
}

impl OwnerResolution {
    fn fixed(owner: &str, resolved_by: ResolvedBy) -> Self {
        Self {
            owner_name: owner.to_string(),
            rotation_category: None,
            resolved_by,
        }
    }

    pub fn advances_rotation(&self) -> bool {
        self.rotation_category.is_some()
    }
}

/// An event with its owner attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: EligibleEvent,
    pub resolution: OwnerResolution,
}

/// Category -> owner assignment table.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPolicy {
    rules: BTreeMap<String, PolicyRule>,
    source_overrides: BTreeMap<SourceId, String>,
}

impl AssignmentPolicy {
    /// Build the table, evaluating conditional rules against `reference`.
    pub fn build<'a, I>(config: &PolicyConfig, reference: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let reference: BTreeSet<&str> = reference.into_iter().collect();
        let mut rules = BTreeMap::new();

        for (category, rule) in &config.categories {
            let rule = match rule {
                RuleConfig::Fixed { owner } => PolicyRule::Fixed {
                    owner: owner_name(category, owner)?,
                },
                RuleConfig::Conditional { choices, fallback } => {
                    let chosen = choices
                        .iter()
                        .find(|c| reference.contains(c.when_present.as_str()));
                    match chosen {
                        Some(choice) => PolicyRule::Conditional {
                            owner: owner_name(category, &choice.owner)?,
                            matched: Some(choice.when_present.clone()),
                        },
                        None => PolicyRule::Conditional {
                            owner: owner_name(category, fallback)?,
                            matched: None,
                        },
                    }
                }
                RuleConfig::Rotating { owners } => {
                    if owners.is_empty() {
                        return Err(PolicyError::EmptyRotation(category.clone()));
                    }
                    let owners = owners
                        .iter()
                        .map(|o| owner_name(category, o))
                        .collect::<Result<Vec<_>, _>>()?;
                    PolicyRule::Rotating { owners }
                }
            };
            rules.insert(category.clone(), rule);
        }

        let mut source_overrides = BTreeMap::new();
        for (source, owner) in &config.source_overrides {
            let owner = owner.trim();
            if owner.is_empty() {
                return Err(PolicyError::BlankOverride(source.clone()));
            }
            source_overrides.insert(SourceId::new(source.trim()), owner.to_string());
        }

        Ok(Self {
            rules,
            source_overrides,
        })
    }

    pub fn rule(&self, category: &str) -> Option<&PolicyRule> {
        self.rules.get(category)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &PolicyRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn source_overrides(&self) -> impl Iterator<Item = (&SourceId, &str)> {
        self.source_overrides.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn classify(&self, category: &str) -> CategoryClass {
        self.rules
            .get(category)
            .map_or(CategoryClass::Unmapped, PolicyRule::class)
    }

    /// Resolve the owner for an event from `source` under `category`.
    ///
    /// Rotating rules read the current cursor; nothing is advanced here.
    pub fn resolve_owner(
        &self,
        category: &str,
        source: &SourceId,
        scope: OwnerScope,
        state: &RotationState,
    ) -> OwnerResolution {
        if let Some(owner) = self.source_overrides.get(source) {
            return OwnerResolution::fixed(owner, ResolvedBy::SourceOverride);
        }
        if scope == OwnerScope::OverridesOnly {
            return OwnerResolution::fixed(UNKNOWN_OWNER, ResolvedBy::MissingOverride);
        }

        match self.rules.get(category) {
            Some(PolicyRule::Fixed { owner }) | Some(PolicyRule::Conditional { owner, .. }) => {
                OwnerResolution::fixed(owner, ResolvedBy::Fixed)
            }
            Some(PolicyRule::Rotating { owners }) => OwnerResolution {
                owner_name: pick(owners, state.cursor(category)).to_string(),
                rotation_category: Some(category.to_string()),
                resolved_by: ResolvedBy::Rotating,
            },
            None => OwnerResolution::fixed(UNKNOWN_OWNER, ResolvedBy::Unmapped),
        }
    }

    /// Owner the next recorded row of a rotating category would get.
    pub fn next_owner(&self, category: &str, state: &RotationState) -> Option<&str> {
        match self.rules.get(category)? {
            PolicyRule::Rotating { owners } => Some(pick(owners, state.cursor(category))),
            PolicyRule::Fixed { owner } | PolicyRule::Conditional { owner, .. } => {
                Some(owner.as_str())
            }
        }
    }

    /// Assign rotating owners over the rows that will actually be recorded.
    ///
    /// `rows` must already be deduplicated and in append order. The k-th
    /// rotating row of a category gets `owners[(cursor + k) % len]`. Returns
    /// the cursors as they must be persisted once the rows are recorded;
    /// `state` itself is left alone.
    pub fn stage_rotation(&self, rows: &mut [ResolvedEvent], state: &RotationState) -> RotationState {
        let mut staged = state.clone();

        for row in rows.iter_mut() {
            let Some(category) = row.resolution.rotation_category.as_deref() else {
                continue;
            };
            let Some(PolicyRule::Rotating { owners }) = self.rules.get(category) else {
                continue;
            };
            row.resolution.owner_name = pick(owners, staged.cursor(category)).to_string();
            staged.advance(category);
        }

        staged
    }
}

fn owner_name(category: &str, owner: &str) -> Result<String, PolicyError> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(PolicyError::BlankOwner(category.to_string()));
    }
    Ok(owner.to_string())
}

fn pick(owners: &[String], cursor: u64) -> &str {
    let index = (cursor % owners.len() as u64) as usize;
    &owners[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rstest::rstest;

    fn owners(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn sample_config() -> PolicyConfig {
        let mut categories = BTreeMap::new();
        categories.insert(
            "P1".to_string(),
            RuleConfig::Rotating {
                owners: owners(&["A", "B"]),
            },
        );
        categories.insert(
            "P2".to_string(),
            RuleConfig::Conditional {
                choices: vec![
                    ConditionalChoice {
                        when_present: "3299".to_string(),
                        owner: "Nancy".to_string(),
                    },
                    ConditionalChoice {
                        when_present: "5935".to_string(),
                        owner: "Aastha".to_string(),
                    },
                ],
                fallback: "unknown instructor".to_string(),
            },
        );
        categories.insert(
            "P5".to_string(),
            RuleConfig::Fixed {
                owner: "Eric".to_string(),
            },
        );

        let mut source_overrides = BTreeMap::new();
        source_overrides.insert("6191".to_string(), "Madeline".to_string());

        PolicyConfig {
            categories,
            source_overrides,
        }
    }

    fn resolved(subject: &str, category: &str, policy: &AssignmentPolicy) -> ResolvedEvent {
        let event = EligibleEvent::new(subject, category, SourceId::from(1), Utc::now()).unwrap();
        let resolution = policy.resolve_owner(
            category,
            event.source_id(),
            OwnerScope::CategoryRules,
            &RotationState::new(),
        );
        ResolvedEvent { event, resolution }
    }

    #[rstest]
    #[case(&["3299", "5935"], "Nancy", Some("3299"))]
    #[case(&["5935"], "Aastha", Some("5935"))]
    #[case(&["4182"], "unknown instructor", None)]
    fn test_conditional_rule_evaluated_at_build(
        #[case] reference: &[&str],
        #[case] expected: &str,
        #[case] matched: Option<&str>,
    ) {
        let policy = AssignmentPolicy::build(&sample_config(), reference.iter().copied()).unwrap();

        assert_eq!(
            policy.rule("P2"),
            Some(&PolicyRule::Conditional {
                owner: expected.to_string(),
                matched: matched.map(str::to_string),
            })
        );
        let resolution = policy.resolve_owner(
            "P2",
            &SourceId::from(1),
            OwnerScope::CategoryRules,
            &RotationState::new(),
        );
        assert_eq!(resolution.owner_name, expected);
        assert!(!resolution.advances_rotation());
    }

    #[rstest]
    #[case("P1", CategoryClass::Rotating)]
    #[case("P2", CategoryClass::Fixed)]
    #[case("P5", CategoryClass::Fixed)]
    #[case("P3", CategoryClass::Unmapped)]
    fn test_classify(#[case] category: &str, #[case] expected: CategoryClass) {
        let policy = AssignmentPolicy::build(&sample_config(), []).unwrap();
        assert_eq!(policy.classify(category), expected);
    }

    #[test]
    fn test_rotating_reads_cursor_without_advancing() {
        let policy = AssignmentPolicy::build(&sample_config(), []).unwrap();
        let mut state = RotationState::new();
        state.set("P1", 3);

        let resolution =
            policy.resolve_owner("P1", &SourceId::from(1), OwnerScope::CategoryRules, &state);

        assert_eq!(resolution.owner_name, "B");
        assert_eq!(resolution.rotation_category.as_deref(), Some("P1"));
        assert_eq!(resolution.resolved_by, ResolvedBy::Rotating);
        assert_eq!(state.cursor("P1"), 3);
    }

    #[test]
    fn test_source_override_wins_over_rotation() {
        let policy = AssignmentPolicy::build(&sample_config(), []).unwrap();

        for scope in [OwnerScope::CategoryRules, OwnerScope::OverridesOnly] {
            let resolution =
                policy.resolve_owner("P1", &SourceId::from(6191), scope, &RotationState::new());

            assert_eq!(resolution.owner_name, "Madeline");
            assert!(!resolution.advances_rotation());
            assert_eq!(resolution.resolved_by, ResolvedBy::SourceOverride);
        }
    }

    #[rstest]
    #[case("P1")]
    #[case("P2")]
    #[case("P3")]
    fn test_overrides_only_source_ignores_category_rules(#[case] category: &str) {
        let policy = AssignmentPolicy::build(&sample_config(), ["3299"]).unwrap();

        let resolution = policy.resolve_owner(
            category,
            &SourceId::from(777),
            OwnerScope::OverridesOnly,
            &RotationState::new(),
        );

        assert_eq!(resolution.owner_name, UNKNOWN_OWNER);
        assert!(!resolution.advances_rotation());
        assert_eq!(resolution.resolved_by, ResolvedBy::MissingOverride);
    }

    #[test]
    fn test_unknown_category_gets_sentinel() {
        let policy = AssignmentPolicy::build(&sample_config(), []).unwrap();

        let resolution = policy.resolve_owner(
            "P3",
            &SourceId::from(1),
            OwnerScope::CategoryRules,
            &RotationState::new(),
        );

        assert_eq!(resolution.owner_name, UNKNOWN_OWNER);
        assert!(!resolution.advances_rotation());
        assert_eq!(resolution.resolved_by, ResolvedBy::Unmapped);
    }

    #[test]
    fn test_build_rejects_empty_rotation() {
        let mut config = PolicyConfig::default();
        config
            .categories
            .insert("P4".to_string(), RuleConfig::Rotating { owners: vec![] });

        assert_eq!(
            AssignmentPolicy::build(&config, []).unwrap_err(),
            PolicyError::EmptyRotation("P4".to_string())
        );
    }

    #[test]
    fn test_build_rejects_blank_owner() {
        let mut config = PolicyConfig::default();
        config.categories.insert(
            "P2".to_string(),
            RuleConfig::Fixed {
                owner: "  ".to_string(),
            },
        );

        assert_eq!(
            AssignmentPolicy::build(&config, []).unwrap_err(),
            PolicyError::BlankOwner("P2".to_string())
        );
    }

    #[test]
    fn test_stage_rotation_skips_non_rotating_rows() {
        let policy = AssignmentPolicy::build(&sample_config(), []).unwrap();
        let mut rows = vec![
            resolved("S1", "P1", &policy),
            resolved("S2", "P5", &policy),
            resolved("S3", "P1", &policy),
            resolved("S4", "P3", &policy),
        ];

        let staged = policy.stage_rotation(&mut rows, &RotationState::new());

        let names: Vec<_> = rows.iter().map(|r| r.resolution.owner_name.as_str()).collect();
        assert_eq!(names, vec!["A", "Eric", "B", UNKNOWN_OWNER]);
        assert_eq!(staged.cursor("P1"), 2);
        assert_eq!(staged.cursor("P5"), 0);
        assert_eq!(staged.cursor("P3"), 0);
    }

    proptest! {
        #[test]
        fn prop_rotation_is_deterministic(start in 0u64..1_000, n in 1usize..6, count in 0usize..20) {
            let names: Vec<String> = (0..n).map(|i| format!("owner-{i}")).collect();
            let mut config = PolicyConfig::default();
            config.categories.insert("R".to_string(), RuleConfig::Rotating { owners: names.clone() });
            let policy = AssignmentPolicy::build(&config, []).unwrap();

            let mut state = RotationState::new();
            state.set("R", start);
            let mut rows: Vec<_> = (0..count)
                .map(|i| {
                    let event = EligibleEvent::new(format!("S{i}"), "R", SourceId::from(1), Utc::now()).unwrap();
                    let resolution = policy.resolve_owner("R", event.source_id(), OwnerScope::CategoryRules, &state);
                    ResolvedEvent { event, resolution }
                })
                .collect();

            let staged = policy.stage_rotation(&mut rows, &state);

            for (i, row) in rows.iter().enumerate() {
                let expected = &names[((start + i as u64) % n as u64) as usize];
                prop_assert_eq!(&row.resolution.owner_name, expected);
            }
            prop_assert_eq!(staged.cursor("R"), start + count as u64);
            prop_assert_eq!(state.cursor("R"), start);
        }
    }
}
