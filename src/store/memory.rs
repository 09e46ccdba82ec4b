//! In-process store used by tests and local runs.
//!
//! A transaction holds the state lock for its whole lifetime and works on a
//! copy, which replaces the shared state only on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LogFilter, LogWithContext, OfferingFilter, Store, StoreTx, SubmissionFilter};
use crate::error::{Error, Result};
use crate::models::{
    ActivityTracker, CatalogKind, CourseOffering, Facilitator, FacilitatorContact, Manager,
    ManagerContact, OfferingDetails, OfferingKey, OfferingStatus, Role, User,
};
use crate::pagination::{Page, PageRequest};

#[derive(Debug, Clone)]
struct Stored<T> {
    row: T,
    deleted_at: Option<DateTime<Utc>>,
}

impl<T> Stored<T> {
    fn live(row: T) -> Self {
        Self { row, deleted_at: None }
    }

    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    facilitators: HashMap<Uuid, Facilitator>,
    managers: HashMap<Uuid, Manager>,
    catalog: HashMap<(CatalogKind, Uuid), String>,
    offerings: HashMap<Uuid, Stored<CourseOffering>>,
    logs: HashMap<Uuid, Stored<ActivityTracker>>,
}

impl State {
    fn live_offering(&self, id: Uuid) -> Option<&CourseOffering> {
        self.offerings.get(&id).filter(|s| s.is_live()).map(|s| &s.row)
    }

    fn live_offerings(&self) -> impl Iterator<Item = &CourseOffering> {
        self.offerings.values().filter(|s| s.is_live()).map(|s| &s.row)
    }

    fn live_logs(&self) -> impl Iterator<Item = &ActivityTracker> {
        self.logs.values().filter(|s| s.is_live()).map(|s| &s.row)
    }

    fn catalog_name(&self, kind: CatalogKind, id: Uuid) -> String {
        self.catalog.get(&(kind, id)).cloned().unwrap_or_default()
    }

    fn contact(&self, facilitator_id: Uuid) -> Option<FacilitatorContact> {
        let f = self.facilitators.get(&facilitator_id)?;
        let user = self.users.get(&f.user_id)?;
        Some(FacilitatorContact {
            id: f.id,
            full_name: user.full_name(),
            email: user.email.clone(),
            max_course_load: f.max_course_load,
            current_course_load: f.current_course_load,
            is_available: f.is_available,
        })
    }

    fn details(&self, offering: &CourseOffering) -> OfferingDetails {
        OfferingDetails {
            offering: offering.clone(),
            module_name: self.catalog_name(CatalogKind::Module, offering.module_id),
            class_name: self.catalog_name(CatalogKind::Class, offering.class_id),
            cohort_name: self.catalog_name(CatalogKind::Cohort, offering.cohort_id),
            mode_name: self.catalog_name(CatalogKind::Mode, offering.mode_id),
            facilitator: offering.facilitator_id.and_then(|id| self.contact(id)),
        }
    }

    fn check_references(&self, offering: &CourseOffering) -> Result<()> {
        let refs = [
            (CatalogKind::Module, offering.module_id),
            (CatalogKind::Class, offering.class_id),
            (CatalogKind::Cohort, offering.cohort_id),
            (CatalogKind::Mode, offering.mode_id),
        ];
        for (kind, id) in refs {
            if !self.catalog.contains_key(&(kind, id)) {
                return Err(Error::InvalidReference(format!("{}.id", kind.table())));
            }
        }
        if let Some(id) = offering.facilitator_id {
            if !self.facilitators.contains_key(&id) {
                return Err(Error::InvalidReference("facilitators.id".into()));
            }
        }
        Ok(())
    }

    fn key_taken(&self, key: &OfferingKey, exclude: Option<Uuid>) -> Option<&CourseOffering> {
        self.live_offerings()
            .find(|o| o.key() == *key && Some(o.id) != exclude)
    }
}

fn sort_offerings_newest_first(rows: &mut [OfferingDetails]) {
    rows.sort_by(|a, b| {
        b.offering
            .created_at
            .cmp(&a.offering.created_at)
            .then_with(|| a.offering.id.cmp(&b.offering.id))
    });
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_catalog_entry(&self, kind: CatalogKind, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.catalog.insert((kind, id), name.to_string());
        id
    }

    pub async fn add_user(&self, first_name: &str, last_name: &str, email: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            role,
            is_active: true,
        };
        self.state.lock().await.users.insert(user.id, user.clone());
        user
    }

    /// Creates a facilitator (and its user) with an empty load.
    pub async fn add_facilitator(&self, first_name: &str, last_name: &str, email: &str, max_load: i32) -> Uuid {
        let user = self.add_user(first_name, last_name, email, Role::Facilitator).await;
        let facilitator = Facilitator {
            id: Uuid::new_v4(),
            user_id: user.id,
            department: None,
            max_course_load: max_load,
            current_course_load: 0,
            is_available: true,
        };
        let id = facilitator.id;
        self.state.lock().await.facilitators.insert(id, facilitator);
        id
    }

    pub async fn add_manager(&self, first_name: &str, last_name: &str, email: &str) -> Uuid {
        let user = self.add_user(first_name, last_name, email, Role::Manager).await;
        let manager = Manager {
            id: Uuid::new_v4(),
            user_id: user.id,
            department: None,
        };
        let id = manager.id;
        self.state.lock().await.managers.insert(id, manager);
        id
    }

    pub async fn set_facilitator_availability(&self, id: Uuid, available: bool) {
        if let Some(f) = self.state.lock().await.facilitators.get_mut(&id) {
            f.is_available = available;
        }
    }

    pub async fn set_facilitator_load(&self, id: Uuid, load: i32) {
        if let Some(f) = self.state.lock().await.facilitators.get_mut(&id) {
            f.current_course_load = load;
        }
    }

    pub async fn set_user_active(&self, user_id: Uuid, active: bool) {
        if let Some(u) = self.state.lock().await.users.get_mut(&user_id) {
            u.is_active = active;
        }
    }

    /// Offering row regardless of soft deletion, with its deletion stamp.
    pub async fn offering_with_tombstone(&self, id: Uuid) -> Option<(CourseOffering, Option<DateTime<Utc>>)> {
        self.state
            .lock()
            .await
            .offerings
            .get(&id)
            .map(|s| (s.row.clone(), s.deleted_at))
    }

    /// Inserts a log bypassing ownership checks, for fixtures.
    pub async fn put_log(&self, log: ActivityTracker) {
        self.state.lock().await.logs.insert(log.id, Stored::live(log));
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn offering(&self, id: Uuid) -> Result<Option<CourseOffering>> {
        Ok(self.state.lock().await.live_offering(id).cloned())
    }

    async fn offering_details(&self, id: Uuid) -> Result<Option<OfferingDetails>> {
        let state = self.state.lock().await;
        Ok(state.live_offering(id).map(|o| state.details(o)))
    }

    async fn list_offerings(
        &self,
        filter: &OfferingFilter,
        page: PageRequest,
    ) -> Result<Page<OfferingDetails>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .live_offerings()
            .filter(|o| filter.matches(o))
            .map(|o| state.details(o))
            .collect();
        sort_offerings_newest_first(&mut rows);
        Ok(Page::from_vec(rows, page))
    }

    async fn active_offerings(&self) -> Result<Vec<OfferingDetails>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .live_offerings()
            .filter(|o| o.status == OfferingStatus::Active)
            .map(|o| state.details(o))
            .collect();
        sort_offerings_newest_first(&mut rows);
        Ok(rows)
    }

    async fn count_active_offerings(&self) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .live_offerings()
            .filter(|o| o.status == OfferingStatus::Active)
            .count();
        Ok(count as i64)
    }

    async fn facilitator_offerings(&self, facilitator_id: Uuid) -> Result<Vec<OfferingDetails>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .live_offerings()
            .filter(|o| {
                o.facilitator_id == Some(facilitator_id)
                    && matches!(o.status, OfferingStatus::Planned | OfferingStatus::Active)
            })
            .map(|o| state.details(o))
            .collect();
        rows.sort_by_key(|d| d.offering.start_date);
        Ok(rows)
    }

    async fn facilitator(&self, id: Uuid) -> Result<Option<Facilitator>> {
        Ok(self.state.lock().await.facilitators.get(&id).cloned())
    }

    async fn facilitator_contact(&self, id: Uuid) -> Result<Option<FacilitatorContact>> {
        Ok(self.state.lock().await.contact(id))
    }

    async fn available_facilitators(&self) -> Result<Vec<FacilitatorContact>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .facilitators
            .values()
            .filter(|f| f.can_take_more_courses())
            .filter_map(|f| state.contact(f.id))
            .collect();
        rows.sort_by(|a, b| {
            a.current_course_load
                .cmp(&b.current_course_load)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        Ok(rows)
    }

    async fn active_managers(&self) -> Result<Vec<ManagerContact>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .managers
            .values()
            .filter_map(|m| {
                let user = state.users.get(&m.user_id).filter(|u| u.is_active)?;
                Some(ManagerContact {
                    id: m.id,
                    full_name: user.full_name(),
                    email: user.email.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(rows)
    }

    async fn insert_log(&self, log: &ActivityTracker) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.live_offering(log.allocation_id).is_none() {
            return Err(Error::InvalidReference("course_offerings.id".into()));
        }
        let taken = state
            .live_logs()
            .any(|l| l.allocation_id == log.allocation_id && l.week_number == log.week_number);
        if taken {
            return Err(Error::DuplicateLog {
                week: log.week_number,
            });
        }
        state.logs.insert(log.id, Stored::live(log.clone()));
        Ok(())
    }

    async fn log(&self, id: Uuid) -> Result<Option<ActivityTracker>> {
        let state = self.state.lock().await;
        Ok(state.logs.get(&id).filter(|s| s.is_live()).map(|s| s.row.clone()))
    }

    async fn find_log(&self, allocation_id: Uuid, week_number: i32) -> Result<Option<ActivityTracker>> {
        let state = self.state.lock().await;
        let found = state
            .live_logs()
            .find(|l| l.allocation_id == allocation_id && l.week_number == week_number)
            .cloned();
        Ok(found)
    }

    async fn save_log(&self, log: &ActivityTracker) -> Result<ActivityTracker> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.logs.get_mut(&log.id).filter(|s| s.is_live()) else {
            return Err(Error::NotFound("Activity log"));
        };
        let row = &mut stored.row;
        row.attendance = log.attendance.clone();
        row.formative_one_grading = log.formative_one_grading;
        row.formative_two_grading = log.formative_two_grading;
        row.summative_grading = log.summative_grading;
        row.course_moderation = log.course_moderation;
        row.intranet_sync = log.intranet_sync;
        row.grade_book_status = log.grade_book_status;
        row.submitted_at = log.submitted_at;
        row.notes = log.notes.clone();
        row.updated_at = log.updated_at;
        Ok(row.clone())
    }

    async fn record_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<ActivityTracker> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.logs.get_mut(&id).filter(|s| s.is_live()) else {
            return Err(Error::NotFound("Activity log"));
        };
        stored.row.increment_reminder_count(at);
        Ok(stored.row.clone())
    }

    async fn soft_delete_log(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.logs.get_mut(&id).filter(|s| s.is_live()) {
            Some(stored) => {
                stored.deleted_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_logs(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<ActivityTracker>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .live_logs()
            .filter(|l| filter.allocation_id.map_or(true, |a| l.allocation_id == a))
            .filter(|l| filter.week_number.map_or(true, |w| l.week_number == w))
            .filter(|l| match filter.status {
                Some(SubmissionFilter::Complete) => l.submitted_at.is_some(),
                Some(SubmissionFilter::Incomplete) => l.submitted_at.is_none(),
                None => true,
            })
            .filter(|l| {
                // logs only list while their offering is live
                let Some(offering) = state.live_offering(l.allocation_id) else {
                    return false;
                };
                filter
                    .facilitator_id
                    .map_or(true, |f| offering.facilitator_id == Some(f))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.week_number
                .cmp(&a.week_number)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(Page::from_vec(rows, page))
    }

    async fn logs_for_week(&self, week_number: i32) -> Result<Vec<LogWithContext>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .live_logs()
            .filter(|l| l.week_number == week_number)
            .filter_map(|l| {
                let offering = state.live_offering(l.allocation_id)?;
                Some(LogWithContext {
                    log: l.clone(),
                    course_name: state.catalog_name(CatalogKind::Module, offering.module_id),
                    facilitator: offering.facilitator_id.and_then(|id| state.contact(id)),
                })
            })
            .collect();
        rows.sort_by(|a, b| a.log.created_at.cmp(&b.log.created_at));
        Ok(rows)
    }

    async fn log_owner(&self, log_id: Uuid) -> Result<Option<Option<Uuid>>> {
        let state = self.state.lock().await;
        let Some(log) = state.logs.get(&log_id).filter(|s| s.is_live()) else {
            return Ok(None);
        };
        Ok(Some(
            state
                .live_offering(log.row.allocation_id)
                .and_then(|o| o.facilitator_id),
        ))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn offering(&mut self, id: Uuid) -> Result<Option<CourseOffering>> {
        Ok(self.work.live_offering(id).cloned())
    }

    async fn find_offering_by_key(
        &mut self,
        key: &OfferingKey,
        exclude: Option<Uuid>,
    ) -> Result<Option<CourseOffering>> {
        Ok(self.work.key_taken(key, exclude).cloned())
    }

    async fn insert_offering(&mut self, offering: &CourseOffering) -> Result<()> {
        self.work.check_references(offering)?;
        if self.work.key_taken(&offering.key(), None).is_some() {
            return Err(Error::DuplicateOffering);
        }
        self.work
            .offerings
            .insert(offering.id, Stored::live(offering.clone()));
        Ok(())
    }

    async fn update_offering(&mut self, offering: &CourseOffering) -> Result<()> {
        self.work.check_references(offering)?;
        if self.work.key_taken(&offering.key(), Some(offering.id)).is_some() {
            return Err(Error::DuplicateOffering);
        }
        match self.work.offerings.get_mut(&offering.id).filter(|s| s.is_live()) {
            Some(stored) => {
                stored.row = offering.clone();
                Ok(())
            }
            None => Err(Error::NotFound("Course offering")),
        }
    }

    async fn soft_delete_offering(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let Some(stored) = self.work.offerings.get_mut(&id).filter(|s| s.is_live()) else {
            return Err(Error::NotFound("Course offering"));
        };
        stored.deleted_at = Some(at);
        for log in self.work.logs.values_mut() {
            if log.row.allocation_id == id && log.is_live() {
                log.deleted_at = Some(at);
            }
        }
        Ok(())
    }

    async fn facilitator(&mut self, id: Uuid) -> Result<Option<Facilitator>> {
        Ok(self.work.facilitators.get(&id).cloned())
    }

    async fn set_facilitator_load(&mut self, id: Uuid, load: i32, _at: DateTime<Utc>) -> Result<()> {
        match self.work.facilitators.get_mut(&id) {
            Some(f) => {
                f.current_course_load = load;
                Ok(())
            }
            None => Err(Error::NotFound("Facilitator")),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
