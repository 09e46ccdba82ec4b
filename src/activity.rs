//! Weekly activity tracker lifecycle.
//!
//! A log is created once per (offering, week) by the offering's facilitator
//! and becomes submitted the first time it is saved in a complete state.
//! Role and ownership checks happen in the HTTP layer through
//! [`OwnerResolver`]; the engine only enforces the creation guard.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::OwnerResolver;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{ActivityStatus, ActivityTracker, MAX_WEEKS};
use crate::notify::Notifier;
use crate::pagination::{Page, PageRequest};
use crate::store::{LogFilter, Store, SubmissionFilter};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewActivityLog {
    pub allocation_id: Uuid,
    pub week_number: i32,
    pub attendance: Vec<bool>,
    pub formative_one_grading: Option<ActivityStatus>,
    pub formative_two_grading: Option<ActivityStatus>,
    pub summative_grading: Option<ActivityStatus>,
    pub course_moderation: Option<ActivityStatus>,
    pub intranet_sync: Option<ActivityStatus>,
    pub grade_book_status: Option<ActivityStatus>,
    pub notes: Option<String>,
}

/// Mutable log fields. `allocationId` and `weekNumber` are not part of the
/// update surface, so clients sending them have them ignored.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogUpdate {
    pub attendance: Option<Vec<bool>>,
    pub formative_one_grading: Option<ActivityStatus>,
    pub formative_two_grading: Option<ActivityStatus>,
    pub summative_grading: Option<ActivityStatus>,
    pub course_moderation: Option<ActivityStatus>,
    pub intranet_sync: Option<ActivityStatus>,
    pub grade_book_status: Option<ActivityStatus>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
}

impl ActivityLogUpdate {
    fn apply(self, log: &mut ActivityTracker) {
        if let Some(attendance) = self.attendance {
            log.attendance = attendance;
        }
        let fields = [
            (self.formative_one_grading, &mut log.formative_one_grading),
            (self.formative_two_grading, &mut log.formative_two_grading),
            (self.summative_grading, &mut log.summative_grading),
            (self.course_moderation, &mut log.course_moderation),
            (self.intranet_sync, &mut log.intranet_sync),
            (self.grade_book_status, &mut log.grade_book_status),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if let Some(notes) = self.notes {
            log.notes = notes;
        }
    }
}

pub(crate) fn validate_week(week_number: i32) -> Result<()> {
    if (1..=MAX_WEEKS).contains(&week_number) {
        Ok(())
    } else {
        Err(Error::validation(
            "weekNumber",
            format!("Week number must be between 1 and {MAX_WEEKS}"),
        ))
    }
}

#[derive(Clone)]
pub struct ActivityEngine {
    store: Arc<dyn Store>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl ActivityEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Creates the week's log for an offering owned by `facilitator_id`.
    ///
    /// The duplicate lookup is advisory: two racing requests can both pass
    /// it, and the storage uniqueness constraint rejects the second insert
    /// with the same `DuplicateLog` error.
    pub async fn create_log(&self, input: NewActivityLog, facilitator_id: Uuid) -> Result<ActivityTracker> {
        validate_week(input.week_number)?;

        let offering = self
            .store
            .offering(input.allocation_id)
            .await?
            .ok_or(Error::NotFound("Course offering"))?;
        if offering.facilitator_id != Some(facilitator_id) {
            warn!(
                offering_id = %offering.id,
                %facilitator_id,
                "log creation refused, facilitator does not own offering"
            );
            return Err(Error::OwnershipViolation);
        }

        if self
            .store
            .find_log(input.allocation_id, input.week_number)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateLog {
                week: input.week_number,
            });
        }

        let now = self.clock.now();
        let mut log = ActivityTracker {
            id: Uuid::new_v4(),
            allocation_id: input.allocation_id,
            week_number: input.week_number,
            attendance: input.attendance,
            formative_one_grading: input.formative_one_grading.unwrap_or_default(),
            formative_two_grading: input.formative_two_grading.unwrap_or_default(),
            summative_grading: input.summative_grading.unwrap_or_default(),
            course_moderation: input.course_moderation.unwrap_or_default(),
            intranet_sync: input.intranet_sync.unwrap_or_default(),
            grade_book_status: input.grade_book_status.unwrap_or_default(),
            submitted_at: None,
            last_reminder_sent: None,
            reminder_count: 0,
            notes: input.notes,
            created_at: now,
            updated_at: now,
        };
        let submitted = log.is_complete();
        if submitted {
            log.mark_submitted(now);
        }

        self.store.insert_log(&log).await?;
        info!(log_id = %log.id, offering_id = %log.allocation_id, week = log.week_number, "activity log created");

        if submitted {
            self.announce_submission(&log).await;
        }
        Ok(log)
    }

    /// Applies `update`; the first save that leaves the log complete
    /// submits it and alerts managers.
    pub async fn update_log(&self, id: Uuid, update: ActivityLogUpdate) -> Result<ActivityTracker> {
        let mut log = self.get_log(id).await?;
        let now = self.clock.now();

        update.apply(&mut log);
        log.updated_at = now;
        let submitting = log.is_complete() && log.submitted_at.is_none();
        if submitting {
            log.mark_submitted(now);
        }
        let log = self.store.save_log(&log).await?;

        if submitting {
            info!(log_id = %log.id, week = log.week_number, "activity log submitted");
            self.announce_submission(&log).await;
        }
        Ok(log)
    }

    /// Explicit submission transition; calling it again re-stamps `submittedAt`.
    pub async fn mark_submitted(&self, id: Uuid) -> Result<ActivityTracker> {
        let mut log = self.get_log(id).await?;
        log.mark_submitted(self.clock.now());
        self.store.save_log(&log).await
    }

    pub async fn get_log(&self, id: Uuid) -> Result<ActivityTracker> {
        self.store.log(id).await?.ok_or(Error::NotFound("Activity log"))
    }

    pub async fn find_log(&self, allocation_id: Uuid, week_number: i32) -> Result<Option<ActivityTracker>> {
        self.store.find_log(allocation_id, week_number).await
    }

    pub async fn delete_log(&self, id: Uuid) -> Result<()> {
        if !self.store.soft_delete_log(id, self.clock.now()).await? {
            return Err(Error::NotFound("Activity log"));
        }
        info!(log_id = %id, "activity log deleted");
        Ok(())
    }

    pub async fn list_logs(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<ActivityTracker>> {
        if let Some(week) = filter.week_number {
            validate_week(week)?;
        }
        self.store.list_logs(filter, page).await
    }

    /// Logs of the offerings assigned to one facilitator.
    pub async fn facilitator_logs(
        &self,
        facilitator_id: Uuid,
        week_number: Option<i32>,
        allocation_id: Option<Uuid>,
        status: Option<SubmissionFilter>,
        page: PageRequest,
    ) -> Result<Page<ActivityTracker>> {
        let filter = LogFilter {
            allocation_id,
            week_number,
            facilitator_id: Some(facilitator_id),
            status,
        };
        self.list_logs(&filter, page).await
    }

    /// Whether the log belongs to an offering assigned to `facilitator_id`.
    pub async fn check_facilitator_ownership(&self, log_id: Uuid, facilitator_id: Uuid) -> Result<bool> {
        let owner = self
            .store
            .log_owner(log_id)
            .await?
            .ok_or(Error::NotFound("Activity log"))?;
        Ok(owner == Some(facilitator_id))
    }

    /// Counts a reminder against the stored row, leaving every other
    /// field as the facilitator last saved it.
    pub async fn increment_reminder_count(&self, id: Uuid) -> Result<ActivityTracker> {
        let log = self.store.record_reminder(id, self.clock.now()).await?;
        debug!(log_id = %id, count = log.reminder_count, "reminder recorded");
        Ok(log)
    }

    async fn announce_submission(&self, log: &ActivityTracker) {
        if let Err(e) = self.notifier.notify_activity_submission(log).await {
            warn!(log_id = %log.id, error = %e, "failed to queue submission alert");
        }
    }
}

#[async_trait]
impl OwnerResolver for ActivityEngine {
    async fn resolve_owner(&self, resource_id: Uuid) -> Result<Option<Option<Uuid>>> {
        self.store.log_owner(resource_id).await
    }
}
