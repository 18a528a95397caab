//! LMS event provider.
//!
//! Pulls students whose submission for a tracked assignment was graded at the
//! threshold score inside the lookback window.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use roster_reconcile::{EligibleEvent, EventProvider, ProviderError, SourceGroup, SourceId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{authorized_client, base_url, endpoint};
use crate::config::CanvasConfig;

const ASSOCIATED_PAGE_SIZE: &str = "200";
const ACCOUNT_PAGE_SIZE: &str = "100";
const COURSE_PAGE_SIZE: &str = "200";

#[derive(Debug, Deserialize)]
struct CourseRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Student {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sis_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Submission {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    graded_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Graded time, if the submission scored `min_score` no earlier than `since`.
    fn qualifying_time(&self, min_score: f64, since: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let score = self.score?;
        let graded_at = self.graded_at?;
        ((score - min_score).abs() < f64::EPSILON && graded_at >= since).then_some(graded_at)
    }
}

/// Event provider backed by the LMS REST API.
#[derive(Debug, Clone)]
pub struct CanvasClient {
    client: reqwest::Client,
    base: Url,
}

impl CanvasClient {
    pub fn new(config: &CanvasConfig, token: &str) -> Result<Self> {
        Ok(Self {
            client: authorized_client(token, Duration::from_secs(config.timeout_secs))?,
            base: base_url(&config.base_url)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = endpoint(&self.base, segments);
        let path = url.path().to_string();

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{path}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(path));
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "HTTP {} for {path}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("{path}: {e}")))
    }

    async fn associated_courses(&self, course_id: u64) -> Result<Vec<SourceId>, ProviderError> {
        let id = course_id.to_string();
        let courses: Vec<CourseRef> = self
            .get_json(
                &[
                    "api",
                    "v1",
                    "courses",
                    &id,
                    "blueprint_templates",
                    "default",
                    "associated_courses",
                ],
                &[("per_page", ASSOCIATED_PAGE_SIZE)],
            )
            .await?;

        Ok(courses.into_iter().map(|c| SourceId::from(c.id)).collect())
    }

    async fn unassociated_courses(
        &self,
        account_id: u64,
        search_terms: &[String],
    ) -> Result<Vec<SourceId>, ProviderError> {
        let id = account_id.to_string();
        let base_query = [
            ("with_enrollments", "true"),
            ("enrollment_type[]", "student"),
            ("published", "true"),
            ("completed", "false"),
            ("blueprint_associated", "false"),
            ("per_page", ACCOUNT_PAGE_SIZE),
        ];

        let mut terms: Vec<Option<&str>> = search_terms.iter().map(|t| Some(t.as_str())).collect();
        if terms.is_empty() {
            terms.push(None);
        }

        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for term in terms {
            let mut query = base_query.to_vec();
            if let Some(term) = term {
                query.push(("search_term", term));
            }

            let courses: Vec<CourseRef> = self
                .get_json(&["api", "v1", "accounts", &id, "courses"], &query)
                .await?;
            for course in courses {
                if seen.insert(course.id) {
                    sources.push(SourceId::from(course.id));
                }
            }
        }

        Ok(sources)
    }
}

#[async_trait]
impl EventProvider for CanvasClient {
    async fn list_sources(&self, group: &SourceGroup) -> Result<Vec<SourceId>, ProviderError> {
        match group {
            SourceGroup::Blueprint { course_id } => self.associated_courses(*course_id).await,
            SourceGroup::Unassociated {
                account_id,
                search_terms,
                ..
            } => self.unassociated_courses(*account_id, search_terms).await,
            SourceGroup::Course { course_id } => Ok(vec![SourceId::from(*course_id)]),
        }
    }

    async fn list_eligible(
        &self,
        source: &SourceId,
        category: &str,
        min_score: f64,
        lookback_days: u32,
    ) -> Result<Vec<EligibleEvent>, ProviderError> {
        let course = source.as_str();
        let since = Utc::now() - chrono::Duration::days(i64::from(lookback_days));

        let students: Vec<Student> = self
            .get_json(
                &["api", "v1", "courses", course, "users"],
                &[
                    ("enrollment_type[]", "student"),
                    ("per_page", COURSE_PAGE_SIZE),
                ],
            )
            .await?;

        let assignments: Vec<Assignment> = self
            .get_json(
                &["api", "v1", "courses", course, "assignments"],
                &[("search_term", category), ("per_page", COURSE_PAGE_SIZE)],
            )
            .await?;

        let Some(assignment) = assignments.into_iter().find(|a| a.name == category) else {
            return Err(ProviderError::NotFound(format!(
                "assignment {category:?} in course {course}"
            )));
        };
        let assignment_id = assignment.id.to_string();

        let mut events = Vec::new();
        for student in students {
            let user_id = student.id.to_string();
            let submission: Submission = match self
                .get_json(
                    &[
                        "api",
                        "v1",
                        "courses",
                        course,
                        "assignments",
                        &assignment_id,
                        "submissions",
                        &user_id,
                    ],
                    &[],
                )
                .await
            {
                Ok(submission) => submission,
                Err(ProviderError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let Some(observed_at) = submission.qualifying_time(min_score, since) else {
                continue;
            };

            let subject_id = match student.sis_user_id.as_deref().map(str::trim) {
                Some(sis) if !sis.is_empty() => sis.to_string(),
                _ => {
                    debug!(user_id = %user_id, "Student has no SIS id, using LMS id");
                    user_id.clone()
                }
            };

            match EligibleEvent::new(subject_id, category, source.clone(), observed_at) {
                Ok(event) => events.push(
                    event
                        .with_display_name(student.name)
                        .with_contact_address(student.email),
                ),
                Err(e) => warn!(user_id = %user_id, error = %e, "Skipping student"),
            }
        }

        debug!(
            course = %course,
            category = %category,
            qualified = events.len(),
            "Checked submissions"
        );

        Ok(events)
    }
}
