//! Course offering registry and facilitator load tracking.
//!
//! Every write that can change which facilitator teaches an offering runs in
//! one [`StoreTx`], so the offering row and the facilitator load counters
//! it implies are committed together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::OwnerResolver;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{
    CourseOffering, Facilitator, FacilitatorContact, IntakePeriod, OfferingDetails, OfferingStatus,
};
use crate::notify::{object, AlertType, Notifier};
use crate::pagination::{Page, PageRequest};
use crate::store::{OfferingFilter, Store, StoreTx};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewOffering {
    pub module_id: Uuid,
    pub class_id: Uuid,
    pub cohort_id: Uuid,
    pub facilitator_id: Option<Uuid>,
    pub mode_id: Uuid,
    pub trimester: i32,
    pub intake_period: IntakePeriod,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_students: i32,
    #[serde(default)]
    pub enrolled_students: i32,
    #[serde(default)]
    pub status: OfferingStatus,
    pub notes: Option<String>,
}

/// Partial update. `facilitatorId: null` unassigns; an absent key leaves
/// the assignment alone.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OfferingUpdate {
    pub module_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub cohort_id: Option<Uuid>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub facilitator_id: Option<Option<Uuid>>,
    pub mode_id: Option<Uuid>,
    pub trimester: Option<i32>,
    pub intake_period: Option<IntakePeriod>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_students: Option<i32>,
    pub enrolled_students: Option<i32>,
    pub status: Option<OfferingStatus>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
}

impl OfferingUpdate {
    /// Applies every field except the facilitator, which goes through
    /// [`reassign`] so the load counters follow it.
    fn apply(self, o: &mut CourseOffering) {
        o.module_id = self.module_id.unwrap_or(o.module_id);
        o.class_id = self.class_id.unwrap_or(o.class_id);
        o.cohort_id = self.cohort_id.unwrap_or(o.cohort_id);
        o.mode_id = self.mode_id.unwrap_or(o.mode_id);
        o.trimester = self.trimester.unwrap_or(o.trimester);
        o.intake_period = self.intake_period.unwrap_or(o.intake_period);
        o.start_date = self.start_date.unwrap_or(o.start_date);
        o.end_date = self.end_date.unwrap_or(o.end_date);
        o.max_students = self.max_students.unwrap_or(o.max_students);
        o.enrolled_students = self.enrolled_students.unwrap_or(o.enrolled_students);
        o.status = self.status.unwrap_or(o.status);
        if let Some(notes) = self.notes {
            o.notes = notes;
        }
    }
}

/// Loads a facilitator that is about to gain an offering and checks it can.
async fn assignable(tx: &mut dyn StoreTx, id: Uuid) -> Result<Facilitator> {
    let facilitator = tx.facilitator(id).await?.ok_or(Error::NotFound("Facilitator"))?;
    facilitator.ensure_assignable()?;
    Ok(facilitator)
}

async fn release(tx: &mut dyn StoreTx, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let Some(facilitator) = tx.facilitator(id).await? else {
        warn!(facilitator_id = %id, "previous facilitator no longer exists, nothing to release");
        return Ok(());
    };
    let load = if facilitator.current_course_load > 0 {
        facilitator.current_course_load - 1
    } else {
        warn!(facilitator_id = %id, "facilitator load already zero");
        0
    };
    tx.set_facilitator_load(id, load, now).await
}

/// Moves `offering` to `target`, adjusting both load counters.
async fn reassign(
    tx: &mut dyn StoreTx,
    offering: &mut CourseOffering,
    target: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<()> {
    if offering.facilitator_id == target {
        return Ok(());
    }
    let incoming = match target {
        Some(id) => Some(assignable(tx, id).await?),
        None => None,
    };
    if let Some(previous) = offering.facilitator_id {
        release(tx, previous, now).await?;
    }
    if let Some(f) = incoming {
        tx.set_facilitator_load(f.id, f.current_course_load + 1, now).await?;
    }
    offering.facilitator_id = target;
    Ok(())
}

#[derive(Clone)]
pub struct CourseRegistry {
    store: Arc<dyn Store>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl CourseRegistry {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub async fn create_offering(&self, input: NewOffering) -> Result<OfferingDetails> {
        let now = self.clock.now();
        let offering = CourseOffering {
            id: Uuid::new_v4(),
            module_id: input.module_id,
            class_id: input.class_id,
            cohort_id: input.cohort_id,
            facilitator_id: input.facilitator_id,
            mode_id: input.mode_id,
            trimester: input.trimester,
            intake_period: input.intake_period,
            start_date: input.start_date,
            end_date: input.end_date,
            max_students: input.max_students,
            enrolled_students: input.enrolled_students,
            status: input.status,
            notes: input.notes,
            created_at: now,
            updated_at: now,
        };
        offering.validate()?;

        let mut tx = self.store.begin().await?;
        if tx.find_offering_by_key(&offering.key(), None).await?.is_some() {
            return Err(Error::DuplicateOffering);
        }
        let facilitator = match offering.facilitator_id {
            Some(id) => Some(assignable(&mut *tx, id).await?),
            None => None,
        };
        tx.insert_offering(&offering).await?;
        if let Some(f) = facilitator {
            tx.set_facilitator_load(f.id, f.current_course_load + 1, now).await?;
        }
        tx.commit().await?;

        info!(offering_id = %offering.id, facilitator_id = ?offering.facilitator_id, "course offering created");
        self.get_offering(offering.id).await
    }

    pub async fn update_offering(&self, id: Uuid, update: OfferingUpdate) -> Result<OfferingDetails> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut offering = tx.offering(id).await?.ok_or(Error::NotFound("Course offering"))?;

        let target = update.facilitator_id;
        update.apply(&mut offering);
        offering.updated_at = now;
        offering.validate()?;
        if tx.find_offering_by_key(&offering.key(), Some(id)).await?.is_some() {
            return Err(Error::DuplicateOffering);
        }
        if let Some(target) = target {
            reassign(&mut *tx, &mut offering, target, now).await?;
        }
        tx.update_offering(&offering).await?;
        tx.commit().await?;

        info!(offering_id = %id, "course offering updated");
        self.get_offering(id).await
    }

    /// Soft-deletes the offering and its logs, releasing the facilitator slot.
    pub async fn delete_offering(&self, id: Uuid) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let offering = tx.offering(id).await?.ok_or(Error::NotFound("Course offering"))?;
        if let Some(facilitator_id) = offering.facilitator_id {
            release(&mut *tx, facilitator_id, now).await?;
        }
        tx.soft_delete_offering(id, now).await?;
        tx.commit().await?;

        info!(offering_id = %id, "course offering deleted");
        Ok(())
    }

    pub async fn assign_facilitator(&self, offering_id: Uuid, facilitator_id: Uuid) -> Result<OfferingDetails> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut offering = tx
            .offering(offering_id)
            .await?
            .ok_or(Error::NotFound("Course offering"))?;
        // checked even when the facilitator already holds this offering
        assignable(&mut *tx, facilitator_id).await?;
        let previous = offering.facilitator_id;
        reassign(&mut *tx, &mut offering, Some(facilitator_id), now).await?;
        offering.updated_at = now;
        tx.update_offering(&offering).await?;
        tx.commit().await?;

        info!(%offering_id, %facilitator_id, previous = ?previous, "facilitator assigned");
        let details = self.get_offering(offering_id).await?;
        if previous != Some(facilitator_id) {
            self.announce_assignment(&details).await;
        }
        Ok(details)
    }

    pub async fn increment_enrollment(&self, id: Uuid) -> Result<OfferingDetails> {
        self.adjust_enrollment(id, CourseOffering::increment_enrollment).await
    }

    pub async fn decrement_enrollment(&self, id: Uuid) -> Result<OfferingDetails> {
        self.adjust_enrollment(id, CourseOffering::decrement_enrollment).await
    }

    async fn adjust_enrollment(
        &self,
        id: Uuid,
        step: fn(&mut CourseOffering) -> Result<()>,
    ) -> Result<OfferingDetails> {
        let mut tx = self.store.begin().await?;
        let mut offering = tx.offering(id).await?.ok_or(Error::NotFound("Course offering"))?;
        step(&mut offering)?;
        offering.updated_at = self.clock.now();
        tx.update_offering(&offering).await?;
        tx.commit().await?;
        self.get_offering(id).await
    }

    pub async fn get_offering(&self, id: Uuid) -> Result<OfferingDetails> {
        self.store
            .offering_details(id)
            .await?
            .ok_or(Error::NotFound("Course offering"))
    }

    pub async fn list_offerings(&self, filter: &OfferingFilter, page: PageRequest) -> Result<Page<OfferingDetails>> {
        self.store.list_offerings(filter, page).await
    }

    pub async fn facilitator_courses(&self, facilitator_id: Uuid) -> Result<Vec<OfferingDetails>> {
        self.store.facilitator_offerings(facilitator_id).await
    }

    pub async fn available_facilitators(&self) -> Result<Vec<FacilitatorContact>> {
        self.store.available_facilitators().await
    }

    async fn announce_assignment(&self, details: &OfferingDetails) {
        let facilitator_name = details
            .facilitator
            .as_ref()
            .map(|f| f.full_name.clone())
            .unwrap_or_default();
        let fields = object(json!({
            "courseName": details.module_name,
            "facilitatorName": facilitator_name,
            "message": format!(
                "{} has been assigned to {} ({}, {}).",
                facilitator_name, details.module_name, details.class_name, details.cohort_name
            ),
        }));
        if let Err(e) = self.notifier.send_manager_alert(AlertType::CourseUpdate, fields).await {
            warn!(offering_id = %details.offering.id, error = %e, "failed to queue course update alert");
        }
    }
}

#[async_trait]
impl OwnerResolver for CourseRegistry {
    async fn resolve_owner(&self, resource_id: Uuid) -> Result<Option<Option<Uuid>>> {
        Ok(self.store.offering(resource_id).await?.map(|o| o.facilitator_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_facilitator_key_differs_from_null() {
        let absent: OfferingUpdate = serde_json::from_value(json!({ "trimester": 2 })).unwrap();
        assert_eq!(absent.facilitator_id, None);

        let cleared: OfferingUpdate = serde_json::from_value(json!({ "facilitatorId": null })).unwrap();
        assert_eq!(cleared.facilitator_id, Some(None));
    }

    #[test]
    fn new_offering_defaults() {
        let input: NewOffering = serde_json::from_value(json!({
            "moduleId": Uuid::new_v4(),
            "classId": Uuid::new_v4(),
            "cohortId": Uuid::new_v4(),
            "modeId": Uuid::new_v4(),
            "trimester": 1,
            "intakePeriod": "HT1",
            "startDate": "2026-01-05",
            "endDate": "2026-04-24",
            "maxStudents": 30,
        }))
        .unwrap();
        assert_eq!(input.status, OfferingStatus::Planned);
        assert_eq!(input.enrolled_students, 0);
        assert_eq!(input.facilitator_id, None);
    }
}
