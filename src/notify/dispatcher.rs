//! Queue consumer: delivers `email` jobs and forwards `activity-reminder`
//! jobs from the reminder queue onto the notification queue.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::mailer::Mailer;
use super::queue::{Job, JobQueue, QueueName, QueuedJob};
use super::templates;
use super::{EmailMessage, ACTIVITY_REMINDER_JOB, EMAIL_JOB};
use crate::clock::Clock;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::seconds(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt once `attempts` have failed, or `None`
    /// when the job is out of attempts.
    pub fn next_delay(&self, attempts: i32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let exp = (attempts - 1).clamp(0, 30) as u32;
        Some(self.base_delay * 2_i32.pow(exp))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Retrying { attempt: i32, run_at: DateTime<Utc> },
    Failed { attempts: i32 },
}

pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    send_timeout: std::time::Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        send_timeout: std::time::Duration,
    ) -> Self {
        Self {
            queue,
            mailer,
            clock,
            retry: RetryPolicy::default(),
            send_timeout,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reserves and handles one due job from `queue`.
    pub async fn process_next(&self, queue: QueueName) -> Result<Option<JobOutcome>> {
        let Some(job) = self.queue.reserve(queue, self.clock.now()).await? else {
            return Ok(None);
        };

        let outcome = match self.handle(&job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                info!(job_id = %job.id, queue = queue.as_str(), name = %job.job.name, "job completed");
                JobOutcome::Completed
            }
            Err(err) => self.fail(&job, err).await?,
        };
        Ok(Some(outcome))
    }

    /// Handles every job currently due on `queue`.
    pub async fn drain(&self, queue: QueueName) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next(queue).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn fail(&self, job: &QueuedJob, err: Error) -> Result<JobOutcome> {
        let message = err.to_string();
        let transient = err.is_transient();
        match self.retry.next_delay(job.attempts) {
            Some(delay) => {
                let run_at = self.clock.now() + delay;
                self.queue.retry(job.id, run_at, &message).await?;
                warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    retry_at = %run_at,
                    transient,
                    error = %message,
                    "job failed, retrying"
                );
                Ok(JobOutcome::Retrying {
                    attempt: job.attempts,
                    run_at,
                })
            }
            None => {
                self.queue.bury(job.id, &message).await?;
                error!(
                    job_id = %job.id,
                    name = %job.job.name,
                    attempts = job.attempts,
                    error = %message,
                    "job failed permanently"
                );
                Ok(JobOutcome::Failed {
                    attempts: job.attempts,
                })
            }
        }
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        match (job.queue, job.job.name.as_str()) {
            (QueueName::Notifications, EMAIL_JOB) => self.deliver(&job.job.data).await,
            (QueueName::Reminders, ACTIVITY_REMINDER_JOB) => {
                let id = self
                    .queue
                    .enqueue(
                        QueueName::Notifications,
                        Job::new(EMAIL_JOB, job.job.data.clone()),
                        self.clock.now(),
                    )
                    .await?;
                info!(job_id = %job.id, email_job_id = %id, "reminder forwarded for delivery");
                Ok(())
            }
            (queue, name) => Err(Error::Internal(format!(
                "no handler for job '{name}' on queue '{}'",
                queue.as_str()
            ))),
        }
    }

    async fn deliver(&self, data: &serde_json::Value) -> Result<()> {
        let message: EmailMessage = serde_json::from_value(data.clone())
            .map_err(|e| Error::Internal(format!("malformed email job: {e}")))?;
        let email = templates::render(&message.template, &message.subject, &message.data)?;
        let message_id = tokio::time::timeout(self.send_timeout, self.mailer.send(&message.to, &email))
            .await
            .map_err(|_| Error::Timeout(format!("sending email to {}", message.to)))??;
        info!(to = %message.to, template = %message.template, %message_id, "email sent");
        Ok(())
    }

    /// Polls both queues until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, poll: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        info!("notification dispatcher started");
        while !*shutdown.borrow() {
            let mut worked = false;
            for queue in [QueueName::Reminders, QueueName::Notifications] {
                match self.process_next(queue).await {
                    Ok(Some(_)) => worked = true,
                    Ok(None) => {}
                    Err(e) => error!(queue = queue.as_str(), error = %e, "dispatcher poll failed"),
                }
            }
            if !worked {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!("notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::seconds(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::seconds(4)));
        assert_eq!(policy.next_delay(3), None);
    }
}
