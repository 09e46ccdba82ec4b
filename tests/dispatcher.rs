mod common;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::World;
use coursedesk::clock::Clock;
use coursedesk::error::{Error, Result};
use coursedesk::notify::templates::RenderedEmail;
use coursedesk::notify::{
    Dispatcher, EmailMessage, Job, JobOutcome, JobQueue, JobStatus, Mailer, QueueName,
};

/// Mailer that records deliveries, failing the first `failures` sends.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, RenderedEmail)>>,
    failures: AtomicUsize,
    stall: Option<std::time::Duration>,
}

impl RecordingMailer {
    fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn stalling(for_: std::time::Duration) -> Self {
        Self {
            stall: Some(for_),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, RenderedEmail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<String> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Delivery("relay returned 503".into()));
        }
        self.sent.lock().unwrap().push((to.to_string(), email.clone()));
        Ok(format!("msg-{}", self.sent.lock().unwrap().len()))
    }
}

fn dispatcher(world: &World, mailer: Arc<RecordingMailer>) -> Dispatcher {
    Dispatcher::new(
        world.queue_handle(),
        mailer,
        world.clock_handle(),
        std::time::Duration::from_millis(200),
    )
}

async fn queue_alert(world: &World) {
    world
        .state
        .notifier
        .queue_notification(&EmailMessage {
            to: "grace@example.edu".into(),
            subject: "Missing Activity Log Alert".into(),
            template: "manager-alert".into(),
            data: json!({
                "managerName": "Grace Hopper",
                "alertType": "missing-activity-log",
                "facilitatorName": "Ada Lovelace",
                "courseName": "Software Engineering",
                "weekNumber": 9,
            })
            .as_object()
            .cloned()
            .unwrap(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn reminder_is_forwarded_then_delivered() {
    let world = World::new().await;
    let ada = world.store.add_facilitator("Ada", "Lovelace", "ada@example.edu", 4).await;
    let offering = world.active_offering(world.cohort_id, Some(ada)).await;
    let details = world.state.registry.get_offering(offering).await.unwrap();
    world.state.notifier.send_facilitator_reminder(&details, 9).await.unwrap();

    let mailer = Arc::new(RecordingMailer::default());
    let dispatcher = dispatcher(&world, mailer.clone());

    assert!(dispatcher.drain(QueueName::Notifications).await.unwrap().is_empty());
    assert_eq!(
        dispatcher.drain(QueueName::Reminders).await.unwrap(),
        vec![JobOutcome::Completed]
    );
    assert!(world.queued_reminders().await.is_empty());
    assert_eq!(world.queued_emails().await.len(), 1);

    assert_eq!(
        dispatcher.drain(QueueName::Notifications).await.unwrap(),
        vec![JobOutcome::Completed]
    );
    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ada@example.edu");
    assert_eq!(sent[0].1.subject, "Activity Log Reminder - Week 9");
    assert!(sent[0].1.html.contains("Dear Ada Lovelace"));
    assert!(sent[0].1.html.contains("Wednesday, March 4, 2026 14:00 UTC"));
    assert!(world.queued_emails().await.is_empty());
}

#[tokio::test]
async fn transient_failures_back_off_then_bury() {
    let world = World::new().await;
    queue_alert(&world).await;
    let mailer = Arc::new(RecordingMailer::failing(usize::MAX));
    let dispatcher = dispatcher(&world, mailer.clone());
    let start = world.clock.now();

    let outcome = dispatcher.process_next(QueueName::Notifications).await.unwrap();
    assert_eq!(
        outcome,
        Some(JobOutcome::Retrying {
            attempt: 1,
            run_at: start + Duration::seconds(2),
        })
    );
    // not due yet
    assert!(dispatcher.process_next(QueueName::Notifications).await.unwrap().is_none());

    world.clock.advance(Duration::seconds(2));
    let outcome = dispatcher.process_next(QueueName::Notifications).await.unwrap();
    assert_eq!(
        outcome,
        Some(JobOutcome::Retrying {
            attempt: 2,
            run_at: start + Duration::seconds(6),
        })
    );

    world.clock.advance(Duration::seconds(3));
    assert!(dispatcher.process_next(QueueName::Notifications).await.unwrap().is_none());
    world.clock.advance(Duration::seconds(1));
    let outcome = dispatcher.process_next(QueueName::Notifications).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Failed { attempts: 3 }));

    let failed = world.queue.jobs(QueueName::Notifications, JobStatus::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 3);
    assert!(failed[0].last_error.as_deref().unwrap().contains("503"));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn delivery_succeeds_on_a_later_attempt() {
    let world = World::new().await;
    queue_alert(&world).await;
    let mailer = Arc::new(RecordingMailer::failing(1));
    let dispatcher = dispatcher(&world, mailer.clone());

    assert!(matches!(
        dispatcher.process_next(QueueName::Notifications).await.unwrap(),
        Some(JobOutcome::Retrying { attempt: 1, .. })
    ));
    world.clock.advance(Duration::seconds(2));
    assert_eq!(
        dispatcher.process_next(QueueName::Notifications).await.unwrap(),
        Some(JobOutcome::Completed)
    );

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.html.contains("MISSING ACTIVITY LOG"));
    assert!(world
        .queue
        .jobs(QueueName::Notifications, JobStatus::Failed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_template_uses_every_attempt_before_failing() {
    let world = World::new().await;
    world
        .state
        .notifier
        .queue_notification(&EmailMessage {
            to: "grace@example.edu".into(),
            subject: "Hello".into(),
            template: "newsletter".into(),
            data: Default::default(),
        })
        .await
        .unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let dispatcher = dispatcher(&world, mailer.clone());

    assert!(matches!(
        dispatcher.drain(QueueName::Notifications).await.unwrap()[..],
        [JobOutcome::Retrying { attempt: 1, .. }]
    ));
    world.clock.advance(Duration::seconds(2));
    assert!(matches!(
        dispatcher.drain(QueueName::Notifications).await.unwrap()[..],
        [JobOutcome::Retrying { attempt: 2, .. }]
    ));
    world.clock.advance(Duration::seconds(4));
    assert_eq!(
        dispatcher.drain(QueueName::Notifications).await.unwrap(),
        vec![JobOutcome::Failed { attempts: 3 }]
    );
    let failed = world.queue.jobs(QueueName::Notifications, JobStatus::Failed).await.unwrap();
    assert!(failed[0].last_error.as_deref().unwrap().contains("newsletter"));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn unknown_job_name_is_buried_after_retries() {
    let world = World::new().await;
    world
        .queue
        .enqueue(QueueName::Reminders, Job::new("digest", json!({})), world.clock.now())
        .await
        .unwrap();
    let dispatcher = dispatcher(&world, Arc::new(RecordingMailer::default()));

    let mut outcomes = Vec::new();
    for wait in [0, 2, 4] {
        world.clock.advance(Duration::seconds(wait));
        outcomes.extend(dispatcher.drain(QueueName::Reminders).await.unwrap());
    }
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2], JobOutcome::Failed { attempts: 3 });
    let failed = world.queue.jobs(QueueName::Reminders, JobStatus::Failed).await.unwrap();
    assert_eq!(failed[0].attempts, 3);
}

#[tokio::test]
async fn slow_mailer_times_out_and_retries() {
    let world = World::new().await;
    queue_alert(&world).await;
    let mailer = Arc::new(RecordingMailer::stalling(std::time::Duration::from_secs(5)));
    let dispatcher = Dispatcher::new(
        world.queue_handle(),
        mailer.clone(),
        world.clock_handle(),
        std::time::Duration::from_millis(20),
    );

    assert!(matches!(
        dispatcher.process_next(QueueName::Notifications).await.unwrap(),
        Some(JobOutcome::Retrying { attempt: 1, .. })
    ));
    let waiting = world.queue.jobs(QueueName::Notifications, JobStatus::Waiting).await.unwrap();
    assert!(waiting[0].last_error.as_deref().unwrap().contains("timed out"));
}
