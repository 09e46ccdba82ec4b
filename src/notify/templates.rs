use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const ACTIVITY_REMINDER: &str = "activity-reminder";
pub const MANAGER_ALERT: &str = "manager-alert";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Renders one of the known templates; any other name is rejected.
pub fn render(template: &str, subject: &str, data: &Map<String, Value>) -> Result<RenderedEmail> {
    let html = match template {
        ACTIVITY_REMINDER => activity_reminder(data),
        MANAGER_ALERT => manager_alert(data),
        other => return Err(Error::UnknownTemplate(other.to_string())),
    };
    Ok(RenderedEmail {
        subject: subject.to_string(),
        html,
    })
}

fn field(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => escape(s),
        Some(Value::Null) | None => String::new(),
        Some(other) => escape(&other.to_string()),
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn due_date(data: &Map<String, Value>) -> String {
    let raw = match data.get("dueDate").and_then(Value::as_str) {
        Some(raw) => raw,
        None => return String::new(),
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .format("%A, %B %-d, %Y %H:%M UTC")
            .to_string(),
        Err(_) => escape(raw),
    }
}

fn activity_reminder(data: &Map<String, Value>) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #333;">Activity Log Reminder</h2>
  <p>Dear {name},</p>
  <p>This is a reminder that your activity log for <strong>Week {week}</strong> is due.</p>
  <div style="background-color: #f5f5f5; padding: 15px; border-radius: 5px; margin: 20px 0;">
    <h3 style="margin-top: 0;">Course Details:</h3>
    <p><strong>Course:</strong> {course}</p>
    <p><strong>Class:</strong> {class}</p>
    <p><strong>Cohort:</strong> {cohort}</p>
    <p><strong>Due Date:</strong> {due}</p>
  </div>
  <p>Please submit your activity log as soon as possible.</p>
  <p>Best regards,<br>Course Management System</p>
</div>"#,
        name = field(data, "facilitatorName"),
        week = field(data, "weekNumber"),
        course = field(data, "courseName"),
        class = field(data, "className"),
        cohort = field(data, "cohortName"),
        due = due_date(data),
    )
}

fn manager_alert(data: &Map<String, Value>) -> String {
    let alert_type = data.get("alertType").and_then(Value::as_str).unwrap_or_default();
    let heading = alert_type.replace('-', " ").to_uppercase();
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #d9534f;">{heading}</h2>
  <p>Dear {name},</p>
  {content}
  <p>Best regards,<br>Course Management System</p>
</div>"#,
        heading = escape(&heading),
        name = field(data, "managerName"),
        content = alert_content(alert_type, data),
    )
}

fn alert_content(alert_type: &str, data: &Map<String, Value>) -> String {
    match alert_type {
        "missing-activity-log" => format!(
            "<p>The facilitator <strong>{}</strong> has not submitted the activity log for <strong>{}</strong> in Week {}.</p>",
            field(data, "facilitatorName"),
            field(data, "courseName"),
            field(data, "weekNumber"),
        ),
        "activity-submitted" => format!(
            "<p>The facilitator <strong>{}</strong> has submitted the activity log for <strong>{}</strong> in Week {}.</p>\n  <p>Completion: {}%</p>",
            field(data, "facilitatorName"),
            field(data, "courseName"),
            field(data, "weekNumber"),
            field(data, "completionPercentage"),
        ),
        "deadline-missed" => format!(
            "<p>The deadline for Week {} activity logs has passed.</p>\n  <p>Missing submissions: {}</p>",
            field(data, "weekNumber"),
            field(data, "missingCount"),
        ),
        "course-update" => format!(
            "<p>The course <strong>{}</strong> has been updated.</p>\n  <p>{}</p>",
            field(data, "courseName"),
            field(data, "message"),
        ),
        _ => "<p>System notification.</p>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn reminder_includes_course_details() {
        let email = render(
            ACTIVITY_REMINDER,
            "Activity Log Reminder - Week 3",
            &data(json!({
                "facilitatorName": "Ada Lovelace",
                "courseName": "Analytical Engines",
                "className": "2026S",
                "cohortName": "Cohort 7",
                "weekNumber": 3,
                "dueDate": "2026-03-04T09:00:00Z",
            })),
        )
        .unwrap();
        assert_eq!(email.subject, "Activity Log Reminder - Week 3");
        assert!(email.html.contains("Dear Ada Lovelace"));
        assert!(email.html.contains("<strong>Week 3</strong>"));
        assert!(email.html.contains("Wednesday, March 4, 2026 09:00 UTC"));
    }

    #[test]
    fn alert_heading_and_content_follow_type() {
        let email = render(
            MANAGER_ALERT,
            "Activity Log Submitted",
            &data(json!({
                "managerName": "Grace Hopper",
                "alertType": "activity-submitted",
                "facilitatorName": "Ada Lovelace",
                "courseName": "Compilers",
                "weekNumber": 2,
                "completionPercentage": 86,
            })),
        )
        .unwrap();
        assert!(email.html.contains("ACTIVITY SUBMITTED"));
        assert!(email.html.contains("Completion: 86%"));
    }

    #[test]
    fn values_are_escaped() {
        let email = render(
            MANAGER_ALERT,
            "x",
            &data(json!({"managerName": "<script>", "alertType": "course-update"})),
        )
        .unwrap();
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn unknown_template_is_rejected() {
        let err = render("newsletter", "x", &Map::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(name) if name == "newsletter"));
    }
}
