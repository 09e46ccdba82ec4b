#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use coursedesk::activity::NewActivityLog;
use coursedesk::clock::{Clock, FixedClock};
use coursedesk::models::{ActivityStatus, CatalogKind, IntakePeriod, OfferingStatus};
use coursedesk::notify::{EmailMessage, JobQueue, JobStatus, MemoryQueue, QueueName};
use coursedesk::pagination::PageLimits;
use coursedesk::registry::NewOffering;
use coursedesk::store::{MemoryStore, Store};
use coursedesk::AppState;

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Seeded in-memory deployment: one module/class/mode, two cohorts.
pub struct World {
    pub store: MemoryStore,
    pub queue: MemoryQueue,
    pub clock: FixedClock,
    pub state: AppState,
    pub module_id: Uuid,
    pub class_id: Uuid,
    pub cohort_id: Uuid,
    pub other_cohort_id: Uuid,
    pub mode_id: Uuid,
}

impl World {
    pub async fn new() -> Self {
        Self::at(at(2026, 3, 2, 14)).await
    }

    pub async fn at(now: DateTime<Utc>) -> Self {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let clock = FixedClock::new(now);
        let module_id = store.add_catalog_entry(CatalogKind::Module, "Software Engineering").await;
        let class_id = store.add_catalog_entry(CatalogKind::Class, "2026S").await;
        let cohort_id = store.add_catalog_entry(CatalogKind::Cohort, "Cohort 7").await;
        let other_cohort_id = store.add_catalog_entry(CatalogKind::Cohort, "Cohort 8").await;
        let mode_id = store.add_catalog_entry(CatalogKind::Mode, "Online").await;

        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(clock.clone()),
            PageLimits::default(),
        );
        Self {
            store,
            queue,
            clock,
            state,
            module_id,
            class_id,
            cohort_id,
            other_cohort_id,
            mode_id,
        }
    }

    pub fn store_handle(&self) -> Arc<dyn Store> {
        Arc::new(self.store.clone())
    }

    pub fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn queue_handle(&self) -> Arc<dyn JobQueue> {
        Arc::new(self.queue.clone())
    }

    pub fn offering(&self, cohort_id: Uuid, facilitator_id: Option<Uuid>) -> NewOffering {
        NewOffering {
            module_id: self.module_id,
            class_id: self.class_id,
            cohort_id,
            facilitator_id,
            mode_id: self.mode_id,
            trimester: 1,
            intake_period: IntakePeriod::Ht1,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 4, 24).unwrap(),
            max_students: 30,
            enrolled_students: 0,
            status: OfferingStatus::Active,
            notes: None,
        }
    }

    /// Creates an active offering in `cohort_id` taught by `facilitator_id`.
    pub async fn active_offering(&self, cohort_id: Uuid, facilitator_id: Option<Uuid>) -> Uuid {
        self.state
            .registry
            .create_offering(self.offering(cohort_id, facilitator_id))
            .await
            .unwrap()
            .offering
            .id
    }

    pub async fn facilitator_load(&self, id: Uuid) -> i32 {
        self.store
            .facilitator(id)
            .await
            .unwrap()
            .unwrap()
            .current_course_load
    }

    /// Emails waiting on the notification queue, decoded.
    pub async fn queued_emails(&self) -> Vec<EmailMessage> {
        self.queue
            .jobs(QueueName::Notifications, JobStatus::Waiting)
            .await
            .unwrap()
            .into_iter()
            .map(|j| serde_json::from_value(j.job.data).unwrap())
            .collect()
    }

    pub async fn queued_reminders(&self) -> Vec<EmailMessage> {
        self.queue
            .jobs(QueueName::Reminders, JobStatus::Waiting)
            .await
            .unwrap()
            .into_iter()
            .map(|j| serde_json::from_value(j.job.data).unwrap())
            .collect()
    }
}

pub fn log_input(allocation_id: Uuid, week_number: i32, done: usize, attendance: Vec<bool>) -> NewActivityLog {
    let status = |i: usize| Some(if i < done { ActivityStatus::Done } else { ActivityStatus::Pending });
    NewActivityLog {
        allocation_id,
        week_number,
        attendance,
        formative_one_grading: status(0),
        formative_two_grading: status(1),
        summative_grading: status(2),
        course_moderation: status(3),
        intranet_sync: status(4),
        grade_book_status: status(5),
        notes: None,
    }
}
