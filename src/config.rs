//! Process configuration read from the environment (and `.env` via dotenvy).

use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pagination::PageLimits;

pub const DEFAULT_REMINDER_CRON: &str = "0 9 * * Mon";
pub const DEFAULT_REMINDER_TIMEZONE: &str = "America/New_York";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub app_env: AppEnv,
    pub reminder_schedule: Schedule,
    pub reminder_timezone: Tz,
    pub deadline_hours: i64,
    pub page_limits: PageLimits,
    pub mail: MailConfig,
    pub worker_poll_interval: Duration,
    pub send_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| Error::Config("DATABASE_URL not set".into()))?;
        let app_env = match get("APP_ENV").as_deref() {
            None | Some("development") | Some("dev") | Some("test") => AppEnv::Development,
            Some("production") | Some("prod") => AppEnv::Production,
            Some(other) => return Err(Error::Config(format!("APP_ENV: unknown environment '{other}'"))),
        };

        let cron = get("REMINDER_CRON_SCHEDULE").unwrap_or_else(|| DEFAULT_REMINDER_CRON.into());
        let tz = get("REMINDER_TIMEZONE").unwrap_or_else(|| DEFAULT_REMINDER_TIMEZONE.into());

        let page_limits = PageLimits {
            default_limit: parse_or(&get, "PAGINATION_DEFAULT_LIMIT", 10)?,
            max_limit: parse_or(&get, "PAGINATION_MAX_LIMIT", 100)?,
        };
        if page_limits.default_limit < 1 || page_limits.max_limit < page_limits.default_limit {
            return Err(Error::Config(
                "PAGINATION_DEFAULT_LIMIT must be between 1 and PAGINATION_MAX_LIMIT".into(),
            ));
        }

        let deadline_hours: i64 = parse_or(&get, "NOTIFICATION_DEADLINE_HOURS", 48)?;
        if deadline_hours < 0 {
            return Err(Error::Config("NOTIFICATION_DEADLINE_HOURS must not be negative".into()));
        }

        let mail = MailConfig {
            api_url: get("MAIL_API_URL"),
            api_token: get("MAIL_API_TOKEN"),
            from: get("MAIL_FROM")
                .unwrap_or_else(|| "Course Management System <noreply@localhost>".into()),
        };
        if app_env == AppEnv::Production && mail.api_url.is_none() {
            return Err(Error::Config("MAIL_API_URL is required in production".into()));
        }

        Ok(Self {
            database_url,
            port: parse_or(&get, "PORT", 3000)?,
            app_env,
            reminder_schedule: parse_schedule(&cron)?,
            reminder_timezone: parse_timezone(&tz)?,
            deadline_hours,
            page_limits,
            mail,
            worker_poll_interval: Duration::from_millis(parse_or(&get, "WORKER_POLL_INTERVAL_MS", 1000)?),
            send_timeout: Duration::from_secs(parse_or(&get, "NOTIFICATION_SEND_TIMEOUT_SECS", 30)?),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    /// Relay endpoint emails are delivered through. Outside production mail
    /// is only logged, even when `MAIL_API_URL` is set.
    pub fn mail_relay(&self) -> Option<&str> {
        if self.is_production() {
            self.mail.api_url.as_deref()
        } else {
            None
        }
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}: invalid value '{raw}'"))),
    }
}

/// Accepts classic five-field cron (minute first) as well as the
/// seconds-first form understood by the `cron` crate.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::Config(format!("REMINDER_CRON_SCHEDULE: {e}")))
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| Error::Config(format!("REMINDER_TIMEZONE: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/x")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.app_env, AppEnv::Development);
        assert_eq!(config.deadline_hours, 48);
        assert_eq!(config.page_limits, PageLimits::default());
        assert_eq!(config.reminder_timezone, chrono_tz::America::New_York);
        assert_eq!(config.send_timeout, Duration::from_secs(30));
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_number_names_the_key() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/x"),
            ("NOTIFICATION_DEADLINE_HOURS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("NOTIFICATION_DEADLINE_HOURS"));
    }

    #[test]
    fn production_needs_a_mail_endpoint() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/x"),
            ("APP_ENV", "production"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAIL_API_URL"));
    }

    #[test]
    fn only_production_delivers_through_the_relay() {
        let relay = "https://mail.example.edu/send";
        let development = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/x"),
            ("MAIL_API_URL", relay),
        ]))
        .unwrap();
        assert_eq!(development.mail_relay(), None);

        let production = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/x"),
            ("APP_ENV", "production"),
            ("MAIL_API_URL", relay),
        ]))
        .unwrap();
        assert_eq!(production.mail_relay(), Some(relay));
    }

    #[test]
    fn five_and_six_field_cron_both_parse() {
        assert!(parse_schedule("0 9 * * Mon").is_ok());
        assert!(parse_schedule("0 30 8 * * Fri").is_ok());
        assert!(parse_schedule("not a schedule").is_err());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(parse_timezone("Africa/Kigali").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
