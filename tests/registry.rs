mod common;

use chrono::NaiveDate;
use common::{log_input, World};
use coursedesk::error::Error;
use coursedesk::notify::AlertType;
use coursedesk::pagination::PageRequest;
use coursedesk::registry::OfferingUpdate;
use coursedesk::store::OfferingFilter;

#[tokio::test]
async fn create_with_facilitator_counts_load() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;

    let details = world
        .state
        .registry
        .create_offering(world.offering(world.cohort_id, Some(ada)))
        .await
        .unwrap();

    assert_eq!(world.facilitator_load(ada).await, 1);
    assert_eq!(details.module_name, "Software Engineering");
    assert_eq!(details.cohort_name, "Cohort 7");
    assert_eq!(details.facilitator.unwrap().full_name, "Ada Lovelace");
}

#[tokio::test]
async fn duplicate_offering_is_rejected_and_rolls_back() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    world.active_offering(world.cohort_id, Some(ada)).await;

    let err = world
        .state
        .registry
        .create_offering(world.offering(world.cohort_id, Some(ada)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateOffering));
    assert_eq!(world.facilitator_load(ada).await, 1);
}

#[tokio::test]
async fn same_key_in_another_cohort_is_allowed() {
    let world = World::new().await;
    world.active_offering(world.cohort_id, None).await;
    world.active_offering(world.other_cohort_id, None).await;

    let page = world
        .state
        .registry
        .list_offerings(&OfferingFilter::default(), PageRequest { page: 1, limit: 10 })
        .await
        .unwrap();
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn capacity_then_successful_assignment() {
    let world = World::new().await;
    let full = world.store.add_facilitator("Grace", "Hopper", "grace@example.edu", 1).await;
    world.store.set_facilitator_load(full, 1).await;

    let mut input = world.offering(world.cohort_id, None);
    input.max_students = 1;
    let offering = world.state.registry.create_offering(input).await.unwrap().offering.id;

    let err = world
        .state
        .registry
        .assign_facilitator(offering, full)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { max: 1 }));
    assert_eq!(world.facilitator_load(full).await, 1);

    let fresh = world.store.add_facilitator("Alan", "Turing", "alan@example.edu", 4).await;
    let details = world.state.registry.assign_facilitator(offering, fresh).await.unwrap();
    assert_eq!(details.offering.facilitator_id, Some(fresh));
    assert_eq!(world.facilitator_load(fresh).await, 1);
}

#[tokio::test]
async fn unavailable_facilitator_is_refused() {
    let world = World::new().await;
    let away = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    world.store.set_facilitator_availability(away, false).await;
    let offering = world.active_offering(world.cohort_id, None).await;

    let err = world
        .state
        .registry
        .assign_facilitator(offering, away)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FacilitatorUnavailable));
}

#[tokio::test]
async fn missing_facilitator_or_offering_is_not_found() {
    let world = World::new().await;
    let offering = world.active_offering(world.cohort_id, None).await;

    let err = world
        .state
        .registry
        .assign_facilitator(offering, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound("Facilitator")));

    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let err = world
        .state
        .registry
        .assign_facilitator(uuid::Uuid::new_v4(), ada)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound("Course offering")));
}

#[tokio::test]
async fn reassignment_moves_exactly_one_unit_of_load() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let alan = world.store.add_facilitator("Alan", "Turing", "alan@example.edu", 4).await;
    world.store.set_facilitator_load(alan, 2).await;
    let offering = world.active_offering(world.cohort_id, Some(ada)).await;
    assert_eq!(world.facilitator_load(ada).await, 1);

    world.state.registry.assign_facilitator(offering, alan).await.unwrap();
    assert_eq!(world.facilitator_load(ada).await, 0);
    assert_eq!(world.facilitator_load(alan).await, 3);

    // assigning the current facilitator again changes nothing
    world.state.registry.assign_facilitator(offering, alan).await.unwrap();
    assert_eq!(world.facilitator_load(alan).await, 3);
}

#[tokio::test]
async fn reassigning_the_same_facilitator_still_checks_capacity() {
    let world = World::new().await;
    world.store.add_manager("Grace", "Hopper", "grace@example.edu").await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 1).await;
    let offering = world.active_offering(world.cohort_id, Some(ada)).await;
    assert_eq!(world.facilitator_load(ada).await, 1);

    let err = world.state.registry.assign_facilitator(offering, ada).await.unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { max: 1 }));
    assert_eq!(world.facilitator_load(ada).await, 1);

    world.store.set_facilitator_load(ada, 0).await;
    world.store.set_facilitator_availability(ada, false).await;
    let err = world.state.registry.assign_facilitator(offering, ada).await.unwrap_err();
    assert!(matches!(err, Error::FacilitatorUnavailable));
    assert!(world.queued_emails().await.is_empty());
}

#[tokio::test]
async fn assignment_alerts_every_active_manager() {
    let world = World::new().await;
    world.store.add_manager("Grace", "Hopper", "grace@example.edu").await;
    world.store.add_manager("Edsger", "Dijkstra", "edsger@example.edu").await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let offering = world.active_offering(world.cohort_id, None).await;

    world.state.registry.assign_facilitator(offering, ada).await.unwrap();

    let emails = world.queued_emails().await;
    assert_eq!(emails.len(), 2);
    for email in &emails {
        assert_eq!(email.subject, AlertType::CourseUpdate.subject());
        assert_eq!(email.data["alertType"], "course-update");
        assert_eq!(email.data["facilitatorName"], "Ada Lovelace");
    }
}

#[tokio::test]
async fn update_unassigns_with_explicit_null() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let offering = world.active_offering(world.cohort_id, Some(ada)).await;

    let untouched = world
        .state
        .registry
        .update_offering(offering, OfferingUpdate { max_students: Some(40), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(untouched.offering.facilitator_id, Some(ada));
    assert_eq!(untouched.offering.max_students, 40);
    assert_eq!(world.facilitator_load(ada).await, 1);

    let cleared = world
        .state
        .registry
        .update_offering(offering, OfferingUpdate { facilitator_id: Some(None), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(cleared.offering.facilitator_id, None);
    assert_eq!(world.facilitator_load(ada).await, 0);
}

#[tokio::test]
async fn update_validates_and_detects_key_collisions() {
    let world = World::new().await;
    world.active_offering(world.cohort_id, None).await;
    let other = world.active_offering(world.other_cohort_id, None).await;

    let err = world
        .state
        .registry
        .update_offering(other, OfferingUpdate { cohort_id: Some(world.cohort_id), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateOffering));

    let err = world
        .state
        .registry
        .update_offering(
            other,
            OfferingUpdate {
                end_date: Some(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(fields) if fields[0].field == "endDate"));

    let err = world
        .state
        .registry
        .update_offering(uuid::Uuid::new_v4(), OfferingUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn delete_releases_load_once_and_cascades_to_logs() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let offering = world.active_offering(world.cohort_id, Some(ada)).await;
    let log = world
        .state
        .activities
        .create_log(log_input(offering, 1, 2, vec![true]), ada)
        .await
        .unwrap();

    world.state.registry.delete_offering(offering).await.unwrap();

    assert_eq!(world.facilitator_load(ada).await, 0);
    let (_, deleted_at) = world.store.offering_with_tombstone(offering).await.unwrap();
    assert!(deleted_at.is_some());
    assert!(matches!(
        world.state.registry.get_offering(offering).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        world.state.activities.get_log(log.id).await,
        Err(Error::NotFound(_))
    ));

    let err = world.state.registry.delete_offering(offering).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(world.facilitator_load(ada).await, 0);
}

#[tokio::test]
async fn deleted_key_can_be_reused() {
    let world = World::new().await;
    let offering = world.active_offering(world.cohort_id, None).await;
    world.state.registry.delete_offering(offering).await.unwrap();
    world.active_offering(world.cohort_id, None).await;
}

#[tokio::test]
async fn create_at_capacity_leaves_nothing_behind() {
    let world = World::new().await;
    let busy = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 2).await;
    world.store.set_facilitator_load(busy, 2).await;

    let err = world
        .state
        .registry
        .create_offering(world.offering(world.cohort_id, Some(busy)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { max: 2 }));

    let page = world
        .state
        .registry
        .list_offerings(&OfferingFilter::default(), PageRequest { page: 1, limit: 10 })
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(world.facilitator_load(busy).await, 2);
}

#[tokio::test]
async fn enrollment_counter_bounds() {
    let world = World::new().await;
    let mut input = world.offering(world.cohort_id, None);
    input.max_students = 1;
    let offering = world.state.registry.create_offering(input).await.unwrap().offering.id;

    let details = world.state.registry.increment_enrollment(offering).await.unwrap();
    assert_eq!(details.offering.enrolled_students, 1);
    assert!(matches!(
        world.state.registry.increment_enrollment(offering).await,
        Err(Error::EnrollmentFull)
    ));

    world.state.registry.decrement_enrollment(offering).await.unwrap();
    assert!(matches!(
        world.state.registry.decrement_enrollment(offering).await,
        Err(Error::NoEnrollment)
    ));
}

#[tokio::test]
async fn available_facilitators_sorted_by_load() {
    let world = World::new().await;
    let busy = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let idle = world.store.add_facilitator("Alan", "Turing", "alan@example.edu", 4).await;
    let full = world.store.add_facilitator("Grace", "Hopper", "grace@example.edu", 1).await;
    world.store.set_facilitator_load(busy, 2).await;
    world.store.set_facilitator_load(full, 1).await;

    let ids: Vec<_> = world
        .state
        .registry
        .available_facilitators()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(ids, vec![idle, busy]);
}

#[tokio::test]
async fn facilitator_courses_lists_planned_and_active() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    world.active_offering(world.cohort_id, Some(ada)).await;
    let mut cancelled = world.offering(world.other_cohort_id, Some(ada));
    cancelled.status = coursedesk::models::OfferingStatus::Cancelled;
    world.state.registry.create_offering(cancelled).await.unwrap();

    let courses = world.state.registry.facilitator_courses(ada).await.unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].cohort_name, "Cohort 7");
}
