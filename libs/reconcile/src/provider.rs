//! Upstream event source interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::event::{EligibleEvent, SourceId};
use crate::policy::OwnerScope;

/// An upstream grouping of sources that share one policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceGroup {
    /// Every course associated with a blueprint course.
    Blueprint { course_id: u64 },

    /// Live courses in an account that have no blueprint, matched by name.
    ///
    /// Owners come from the source overrides unless `owner_scope` says
    /// otherwise.
    Unassociated {
        account_id: u64,
        #[serde(default)]
        search_terms: Vec<String>,
        #[serde(default = "overrides_only")]
        owner_scope: OwnerScope,
    },

    /// A single course.
    Course { course_id: u64 },
}

impl SourceGroup {
    /// Stable identifier, also the member name conditional rules test for.
    pub fn id(&self) -> String {
        match self {
            Self::Blueprint { course_id } | Self::Course { course_id } => course_id.to_string(),
            Self::Unassociated { account_id, .. } => format!("account:{account_id}"),
        }
    }

    /// Which rules may pick owners for this group's events.
    pub fn owner_scope(&self) -> OwnerScope {
        match self {
            Self::Blueprint { .. } | Self::Course { .. } => OwnerScope::CategoryRules,
            Self::Unassociated { owner_scope, .. } => *owner_scope,
        }
    }
}

fn overrides_only() -> OwnerScope {
    OwnerScope::OverridesOnly
}

/// Supplies eligible events.
#[async_trait]
pub trait EventProvider: Send + Sync {
    /// Expand a group into its sources.
    async fn list_sources(&self, group: &SourceGroup) -> Result<Vec<SourceId>, ProviderError>;

    /// Events for `category` in `source` that scored `min_score` within the
    /// last `lookback_days`. A missing category is [`ProviderError::NotFound`].
    async fn list_eligible(
        &self,
        source: &SourceId,
        category: &str,
        min_score: f64,
        lookback_days: u32,
    ) -> Result<Vec<EligibleEvent>, ProviderError>;
}
