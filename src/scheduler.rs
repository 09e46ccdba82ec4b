//! Periodic reminder pass.
//!
//! [`ReminderScheduler::run_pass`] is one self-contained sweep over the
//! active offerings and can be driven directly with a fixed clock;
//! [`ReminderScheduler::run`] only decides when to call it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::activity::ActivityEngine;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::{OfferingDetails, MAX_WEEKS};
use crate::notify::{object, AlertType, Notifier};
use crate::store::Store;

/// Week of the 16-week cycle that `date` falls in: whole weeks elapsed since
/// January 1st, modulo 16, with 0 reported as week 16.
///
/// Offerings are not anchored to their own start date: every offering is
/// checked against the same calendar week.
pub fn current_week(date: NaiveDate) -> i32 {
    let weeks_elapsed = date.ordinal0() as i32 / 7;
    match weeks_elapsed % MAX_WEEKS {
        0 => MAX_WEEKS,
        week => week,
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub week: i32,
    pub offerings_checked: usize,
    pub reminders_sent: usize,
    pub alerts_sent: usize,
    pub failures: usize,
}

#[derive(Debug, Default)]
struct OfferingCheck {
    reminded: bool,
    alerted: bool,
}

pub struct ReminderScheduler {
    store: Arc<dyn Store>,
    engine: ActivityEngine,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    deadline: Duration,
    offering_timeout: std::time::Duration,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: ActivityEngine,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        deadline_hours: i64,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            clock,
            timezone,
            deadline: Duration::hours(deadline_hours),
            offering_timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_offering_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.offering_timeout = timeout;
        self
    }

    /// One sweep over the active offerings. A failing or slow offering is
    /// logged and counted; it never stops the rest of the pass.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let now = self.clock.now();
        let week = current_week(now.with_timezone(&self.timezone).date_naive());
        let deadline = now - self.deadline;
        let offerings = self.store.active_offerings().await?;

        let mut report = PassReport {
            week,
            ..PassReport::default()
        };
        for offering in &offerings {
            report.offerings_checked += 1;
            let id = offering.offering.id;
            match tokio::time::timeout(
                self.offering_timeout,
                self.check_offering(offering, week, now, deadline),
            )
            .await
            {
                Ok(Ok(check)) => {
                    report.reminders_sent += usize::from(check.reminded);
                    report.alerts_sent += usize::from(check.alerted);
                }
                Ok(Err(e)) => {
                    report.failures += 1;
                    error!(offering_id = %id, week, error = %e, "reminder check failed");
                }
                Err(_) => {
                    report.failures += 1;
                    error!(offering_id = %id, week, "reminder check timed out");
                }
            }
        }

        info!(
            week,
            checked = report.offerings_checked,
            reminders = report.reminders_sent,
            alerts = report.alerts_sent,
            failures = report.failures,
            "reminder pass finished"
        );
        Ok(report)
    }

    async fn check_offering(
        &self,
        offering: &OfferingDetails,
        week: i32,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<OfferingCheck> {
        let id = offering.offering.id;
        let log = self.engine.find_log(id, week).await?;
        let mut check = OfferingCheck::default();

        let overdue = match &log {
            None => true,
            Some(log) => log.submitted_at.is_none() && log.created_at < deadline,
        };
        let last_reminder = log.as_ref().and_then(|l| l.last_reminder_sent);
        let reminder_due = last_reminder.map_or(true, |last| now - last > Duration::hours(24));

        if overdue && reminder_due {
            if offering.facilitator.is_some() {
                self.notifier.send_facilitator_reminder(offering, week).await?;
                if let Some(log) = &log {
                    self.engine.increment_reminder_count(log.id).await?;
                }
                check.reminded = true;
            } else {
                warn!(offering_id = %id, week, "no facilitator assigned, reminder skipped");
            }
        }

        if log.is_none() && now > deadline {
            let facilitator_name = offering
                .facilitator
                .as_ref()
                .map_or_else(|| "Unassigned".to_string(), |f| f.full_name.clone());
            self.notifier
                .send_manager_alert(
                    AlertType::MissingActivityLog,
                    object(json!({
                        "facilitatorName": facilitator_name,
                        "courseName": offering.module_name,
                        "className": offering.class_name,
                        "cohortName": offering.cohort_name,
                        "weekNumber": week,
                    })),
                )
                .await?;
            check.alerted = true;
        }
        Ok(check)
    }

    /// Runs a pass at every fire time of `schedule` in the configured
    /// timezone until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, schedule: Schedule, mut shutdown: watch::Receiver<bool>) {
        info!(timezone = %self.timezone, "reminder scheduler started");
        while !*shutdown.borrow() {
            let local_now = self.clock.now().with_timezone(&self.timezone);
            let Some(next) = schedule.after(&local_now).next() else {
                warn!("reminder schedule has no upcoming fire times");
                break;
            };
            let wait = (next.with_timezone(&Utc) - self.clock.now())
                .to_std()
                .unwrap_or_default();
            info!(next_run = %next, "next reminder pass scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "reminder pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("reminder scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weeks_cycle_through_sixteen() {
        // the first seven days have no whole week behind them
        assert_eq!(current_week(day(2026, 1, 1)), 16);
        assert_eq!(current_week(day(2026, 1, 7)), 16);
        assert_eq!(current_week(day(2026, 1, 8)), 1);
        assert_eq!(current_week(day(2026, 3, 2)), 8);
        assert_eq!(current_week(day(2026, 4, 22)), 15);
        assert_eq!(current_week(day(2026, 4, 23)), 16);
        assert_eq!(current_week(day(2026, 4, 30)), 1);
        assert_eq!(current_week(day(2026, 12, 31)), 4);
    }

    #[test]
    fn never_zero() {
        let mut date = day(2028, 1, 1);
        while date.year() == 2028 {
            let week = current_week(date);
            assert!((1..=MAX_WEEKS).contains(&week), "{date} -> {week}");
            date = date.succ_opt().unwrap();
        }
    }
}
