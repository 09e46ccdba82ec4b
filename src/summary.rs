use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::activity::validate_week;
use crate::error::Result;
use crate::models::FacilitatorContact;
use crate::store::Store;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Complete,
    Incomplete,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionLine {
    pub id: Uuid,
    pub course_name: String,
    pub facilitator_name: Option<String>,
    pub completion_percentage: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: SubmissionState,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySummary {
    pub week_number: i32,
    pub total_expected: i64,
    pub total_submitted: i64,
    pub complete_submissions: i64,
    pub incomplete_submissions: i64,
    pub submissions: Vec<SubmissionLine>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingLog {
    pub offering_id: Uuid,
    pub course_name: String,
    pub class_name: String,
    pub cohort_name: String,
    pub facilitator: Option<FacilitatorContact>,
}

/// Read-only aggregation over one week's logs.
#[derive(Clone)]
pub struct SummaryService {
    store: Arc<dyn Store>,
}

impl SummaryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn weekly_summary(&self, week_number: i32) -> Result<WeeklySummary> {
        validate_week(week_number)?;
        let total_expected = self.store.count_active_offerings().await?;
        let logs = self.store.logs_for_week(week_number).await?;

        let submissions: Vec<SubmissionLine> = logs
            .into_iter()
            .map(|row| SubmissionLine {
                id: row.log.id,
                course_name: row.course_name,
                facilitator_name: row.facilitator.map(|f| f.full_name),
                completion_percentage: row.log.completion_percentage(),
                submitted_at: row.log.submitted_at,
                status: if row.log.is_complete() {
                    SubmissionState::Complete
                } else {
                    SubmissionState::Incomplete
                },
            })
            .collect();
        let complete = submissions
            .iter()
            .filter(|s| s.status == SubmissionState::Complete)
            .count() as i64;

        Ok(WeeklySummary {
            week_number,
            total_expected,
            total_submitted: submissions.len() as i64,
            complete_submissions: complete,
            incomplete_submissions: submissions.len() as i64 - complete,
            submissions,
        })
    }

    /// Active offerings without a log for `week_number`.
    pub async fn missing_logs(&self, week_number: i32) -> Result<Vec<MissingLog>> {
        validate_week(week_number)?;
        let logged: HashSet<Uuid> = self
            .store
            .logs_for_week(week_number)
            .await?
            .into_iter()
            .map(|row| row.log.allocation_id)
            .collect();

        Ok(self
            .store
            .active_offerings()
            .await?
            .into_iter()
            .filter(|o| !logged.contains(&o.offering.id))
            .map(|o| MissingLog {
                offering_id: o.offering.id,
                course_name: o.module_name,
                class_name: o.class_name,
                cohort_name: o.cohort_name,
                facilitator: o.facilitator,
            })
            .collect())
    }
}
