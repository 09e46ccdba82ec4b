//! Persistence seam for offerings, facilitators and activity trackers.
//!
//! Registry writes go through [`StoreTx`] so that an offering mutation and the
//! facilitator load counter it implies commit or roll back together. Activity
//! tracker writes are single statements; duplicate weekly logs are rejected
//! by the storage-level uniqueness constraint on (allocation, week).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ActivityTracker, CourseOffering, Facilitator, FacilitatorContact, IntakePeriod, ManagerContact,
    OfferingDetails, OfferingKey, OfferingStatus,
};
use crate::pagination::{Page, PageRequest};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Default)]
pub struct OfferingFilter {
    pub trimester: Option<i32>,
    pub cohort_id: Option<Uuid>,
    pub facilitator_id: Option<Uuid>,
    pub intake_period: Option<IntakePeriod>,
    pub mode_id: Option<Uuid>,
    pub status: Option<OfferingStatus>,
}

impl OfferingFilter {
    pub fn matches(&self, o: &CourseOffering) -> bool {
        self.trimester.map_or(true, |t| o.trimester == t)
            && self.cohort_id.map_or(true, |c| o.cohort_id == c)
            && self.facilitator_id.map_or(true, |f| o.facilitator_id == Some(f))
            && self.intake_period.map_or(true, |p| o.intake_period == p)
            && self.mode_id.map_or(true, |m| o.mode_id == m)
            && self.status.map_or(true, |s| o.status == s)
    }
}

/// Submission state filter for log listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionFilter {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub allocation_id: Option<Uuid>,
    pub week_number: Option<i32>,
    pub facilitator_id: Option<Uuid>,
    pub status: Option<SubmissionFilter>,
}

/// Weekly log joined with the names needed by summaries and alerts.
#[derive(Debug, Clone)]
pub struct LogWithContext {
    pub log: ActivityTracker,
    pub course_name: String,
    pub facilitator: Option<FacilitatorContact>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Opens a unit of work; dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn offering(&self, id: Uuid) -> Result<Option<CourseOffering>>;
    async fn offering_details(&self, id: Uuid) -> Result<Option<OfferingDetails>>;
    async fn list_offerings(
        &self,
        filter: &OfferingFilter,
        page: PageRequest,
    ) -> Result<Page<OfferingDetails>>;
    async fn active_offerings(&self) -> Result<Vec<OfferingDetails>>;
    async fn count_active_offerings(&self) -> Result<i64>;
    /// Planned and active offerings of one facilitator, by start date.
    async fn facilitator_offerings(&self, facilitator_id: Uuid) -> Result<Vec<OfferingDetails>>;

    async fn facilitator(&self, id: Uuid) -> Result<Option<Facilitator>>;
    async fn facilitator_contact(&self, id: Uuid) -> Result<Option<FacilitatorContact>>;
    /// Available facilitators ordered by ascending current load.
    async fn available_facilitators(&self) -> Result<Vec<FacilitatorContact>>;
    /// Managers whose user account is active.
    async fn active_managers(&self) -> Result<Vec<ManagerContact>>;

    /// Inserts a log; fails with `DuplicateLog` when a live log already
    /// exists for the same (allocation, week).
    async fn insert_log(&self, log: &ActivityTracker) -> Result<()>;
    async fn log(&self, id: Uuid) -> Result<Option<ActivityTracker>>;
    async fn find_log(&self, allocation_id: Uuid, week_number: i32) -> Result<Option<ActivityTracker>>;
    /// Writes the facilitator-editable fields and `submitted_at`, returning
    /// the stored row. Reminder bookkeeping is never written here.
    async fn save_log(&self, log: &ActivityTracker) -> Result<ActivityTracker>;
    /// Atomically bumps `reminder_count` and stamps `last_reminder_sent`.
    async fn record_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<ActivityTracker>;
    async fn soft_delete_log(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    async fn list_logs(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<ActivityTracker>>;
    async fn logs_for_week(&self, week_number: i32) -> Result<Vec<LogWithContext>>;
    /// Facilitator owning the log's offering: `None` when the log is absent,
    /// `Some(None)` when the offering has no facilitator.
    async fn log_owner(&self, log_id: Uuid) -> Result<Option<Option<Uuid>>>;
}

/// Transactional operations used by the course offering registry.
///
/// Reads through a transaction lock the rows they return until commit.
#[async_trait]
pub trait StoreTx: Send {
    async fn offering(&mut self, id: Uuid) -> Result<Option<CourseOffering>>;
    /// Live offering holding `key`, other than `exclude`.
    async fn find_offering_by_key(
        &mut self,
        key: &OfferingKey,
        exclude: Option<Uuid>,
    ) -> Result<Option<CourseOffering>>;
    /// Fails with `DuplicateOffering` on a key collision.
    async fn insert_offering(&mut self, offering: &CourseOffering) -> Result<()>;
    async fn update_offering(&mut self, offering: &CourseOffering) -> Result<()>;
    /// Soft-deletes the offering and its activity trackers.
    async fn soft_delete_offering(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn facilitator(&mut self, id: Uuid) -> Result<Option<Facilitator>>;
    async fn set_facilitator_load(&mut self, id: Uuid, load: i32, at: DateTime<Utc>) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
