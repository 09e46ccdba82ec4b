//! Notification pipeline: producers enqueue jobs here, the dispatcher
//! consumes them.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{ActivityTracker, OfferingDetails};
use crate::store::Store;

pub mod dispatcher;
pub mod mailer;
pub mod queue;
pub mod templates;

pub use dispatcher::{Dispatcher, JobOutcome, RetryPolicy};
pub use mailer::{HttpMailer, LogMailer, Mailer};
pub use queue::{Job, JobQueue, JobStatus, MemoryQueue, PgQueue, QueueName, QueuedJob};

pub const EMAIL_JOB: &str = "email";
pub const ACTIVITY_REMINDER_JOB: &str = "activity-reminder";

/// Payload of an `email` job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub template: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    MissingActivityLog,
    ActivitySubmitted,
    DeadlineMissed,
    CourseUpdate,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::MissingActivityLog => "missing-activity-log",
            AlertType::ActivitySubmitted => "activity-submitted",
            AlertType::DeadlineMissed => "deadline-missed",
            AlertType::CourseUpdate => "course-update",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            AlertType::MissingActivityLog => "Missing Activity Log Alert",
            AlertType::ActivitySubmitted => "Activity Log Submitted",
            AlertType::DeadlineMissed => "Activity Log Deadline Missed",
            AlertType::CourseUpdate => "Course Allocation Update",
        }
    }
}

/// Turns domain events into queued notification jobs.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { store, queue, clock }
    }

    /// Enqueues an email for immediate delivery.
    pub async fn queue_notification(&self, message: &EmailMessage) -> Result<Uuid> {
        let id = self
            .queue
            .enqueue(QueueName::Notifications, email_job(EMAIL_JOB, message)?, self.clock.now())
            .await?;
        debug!(job_id = %id, to = %message.to, template = %message.template, "notification queued");
        Ok(id)
    }

    /// Enqueues a reminder on the reminder queue, due after `delay`.
    pub async fn queue_reminder(&self, message: &EmailMessage, delay: Duration) -> Result<Uuid> {
        let id = self
            .queue
            .enqueue(
                QueueName::Reminders,
                email_job(ACTIVITY_REMINDER_JOB, message)?,
                self.clock.now() + delay,
            )
            .await?;
        debug!(job_id = %id, to = %message.to, "reminder queued");
        Ok(id)
    }

    /// Reminds the offering's facilitator that the week's log is due in two days.
    pub async fn send_facilitator_reminder(&self, offering: &OfferingDetails, week: i32) -> Result<Uuid> {
        let facilitator = offering
            .facilitator
            .as_ref()
            .ok_or(Error::NotFound("Facilitator"))?;
        let due = self.clock.now() + Duration::days(2);
        let message = EmailMessage {
            to: facilitator.email.clone(),
            subject: format!("Activity Log Reminder - Week {week}"),
            template: templates::ACTIVITY_REMINDER.to_string(),
            data: object(json!({
                "facilitatorName": facilitator.full_name,
                "courseName": offering.module_name,
                "className": offering.class_name,
                "cohortName": offering.cohort_name,
                "weekNumber": week,
                "dueDate": due.to_rfc3339(),
            })),
        };
        let id = self.queue_reminder(&message, Duration::zero()).await?;
        info!(offering_id = %offering.offering.id, facilitator_id = %facilitator.id, week, "facilitator reminder queued");
        Ok(id)
    }

    /// Sends one alert to every active manager; returns how many were queued.
    pub async fn send_manager_alert(&self, alert: AlertType, fields: Map<String, Value>) -> Result<usize> {
        let managers = self.store.active_managers().await?;
        for manager in &managers {
            let mut data = fields.clone();
            data.insert("managerName".into(), Value::String(manager.full_name.clone()));
            data.insert("alertType".into(), Value::String(alert.as_str().into()));
            self.queue_notification(&EmailMessage {
                to: manager.email.clone(),
                subject: alert.subject().to_string(),
                template: templates::MANAGER_ALERT.to_string(),
                data,
            })
            .await?;
        }
        info!(alert = alert.as_str(), recipients = managers.len(), "manager alert queued");
        Ok(managers.len())
    }

    pub async fn notify_activity_submission(&self, log: &ActivityTracker) -> Result<usize> {
        let offering = self
            .store
            .offering_details(log.allocation_id)
            .await?
            .ok_or(Error::NotFound("Course offering"))?;
        let facilitator_name = offering
            .facilitator
            .as_ref()
            .map_or_else(|| "Unassigned".to_string(), |f| f.full_name.clone());
        self.send_manager_alert(
            AlertType::ActivitySubmitted,
            object(json!({
                "facilitatorName": facilitator_name,
                "courseName": offering.module_name,
                "weekNumber": log.week_number,
                "completionPercentage": log.completion_percentage(),
                "submittedAt": log.submitted_at.map(|t| t.to_rfc3339()),
            })),
        )
        .await
    }
}

fn email_job(name: &str, message: &EmailMessage) -> Result<Job> {
    let data = serde_json::to_value(message).map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Job::new(name, data))
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
