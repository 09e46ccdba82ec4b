use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, FieldError, Result};

pub const MAX_WEEKS: i32 = 16;
pub const MAX_STUDENTS: i32 = 500;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Internal(format!(
                        "unexpected {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntakePeriod {
    #[serde(rename = "HT1")]
    Ht1,
    #[serde(rename = "HT2")]
    Ht2,
    #[serde(rename = "FT")]
    Ft,
}

text_enum!(IntakePeriod { Ht1 => "HT1", Ht2 => "HT2", Ft => "FT" });

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OfferingStatus {
    #[default]
    Planned,
    Active,
    Completed,
    Cancelled,
}

text_enum!(OfferingStatus {
    Planned => "planned",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityStatus {
    Done,
    Pending,
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
}

text_enum!(ActivityStatus {
    Done => "Done",
    Pending => "Pending",
    NotStarted => "Not Started",
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Facilitator,
    Student,
}

text_enum!(Role {
    Admin => "admin",
    Manager => "manager",
    Facilitator => "facilitator",
    Student => "student",
});

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Facilitator {
    pub id: Uuid,
    pub user_id: Uuid,
    pub department: Option<String>,
    pub max_course_load: i32,
    pub current_course_load: i32,
    pub is_available: bool,
}

impl Facilitator {
    pub fn can_take_more_courses(&self) -> bool {
        self.current_course_load < self.max_course_load && self.is_available
    }

    pub fn remaining_capacity(&self) -> i32 {
        self.max_course_load - self.current_course_load
    }

    /// Guard applied whenever this facilitator is about to gain an offering.
    pub fn ensure_assignable(&self) -> Result<()> {
        if !self.is_available {
            return Err(Error::FacilitatorUnavailable);
        }
        if !self.can_take_more_courses() {
            return Err(Error::CapacityExceeded {
                max: self.max_course_load,
            });
        }
        Ok(())
    }
}

/// Facilitator joined with the owning user's contact details.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorContact {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub max_course_load: i32,
    pub current_course_load: i32,
    pub is_available: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manager {
    pub id: Uuid,
    pub user_id: Uuid,
    pub department: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagerContact {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

/// Reference tables an offering points at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Module,
    Class,
    Cohort,
    Mode,
}

impl CatalogKind {
    pub fn table(&self) -> &'static str {
        match self {
            CatalogKind::Module => "modules",
            CatalogKind::Class => "classes",
            CatalogKind::Cohort => "cohorts",
            CatalogKind::Mode => "modes",
        }
    }
}

/// (module, class, cohort, trimester, intake period): unique among live offerings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OfferingKey {
    pub module_id: Uuid,
    pub class_id: Uuid,
    pub cohort_id: Uuid,
    pub trimester: i32,
    pub intake_period: IntakePeriod,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseOffering {
    pub id: Uuid,
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
    pub enrolled_students: i32,
    pub status: OfferingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseOffering {
    pub fn key(&self) -> OfferingKey {
        OfferingKey {
            module_id: self.module_id,
            class_id: self.class_id,
            cohort_id: self.cohort_id,
            trimester: self.trimester,
            intake_period: self.intake_period,
        }
    }

    pub fn remaining_slots(&self) -> i32 {
        self.max_students - self.enrolled_students
    }

    /// Open for enrolment: seats left and the offering is running.
    pub fn is_open(&self) -> bool {
        self.enrolled_students < self.max_students && self.status == OfferingStatus::Active
    }

    pub fn increment_enrollment(&mut self) -> Result<()> {
        if self.enrolled_students >= self.max_students {
            return Err(Error::EnrollmentFull);
        }
        self.enrolled_students += 1;
        Ok(())
    }

    pub fn decrement_enrollment(&mut self) -> Result<()> {
        if self.enrolled_students <= 0 {
            return Err(Error::NoEnrollment);
        }
        self.enrolled_students -= 1;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if !(1..=3).contains(&self.trimester) {
            errors.push(FieldError::new("trimester", "Trimester must be between 1 and 3"));
        }
        if self.end_date <= self.start_date {
            errors.push(FieldError::new("endDate", "End date must be after start date"));
        }
        if !(1..=MAX_STUDENTS).contains(&self.max_students) {
            errors.push(FieldError::new(
                "maxStudents",
                format!("Max students must be between 1 and {MAX_STUDENTS}"),
            ));
        }
        if self.enrolled_students < 0 {
            errors.push(FieldError::new("enrolledStudents", "Enrolled students cannot be negative"));
        } else if self.enrolled_students > self.max_students {
            errors.push(FieldError::new(
                "enrolledStudents",
                "Enrolled students cannot exceed maximum students",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// Offering with its relations resolved for display.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferingDetails {
    #[serde(flatten)]
    pub offering: CourseOffering,
    pub module_name: String,
    pub class_name: String,
    pub cohort_name: String,
    pub mode_name: String,
    pub facilitator: Option<FacilitatorContact>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTracker {
    pub id: Uuid,
    pub allocation_id: Uuid,
    pub week_number: i32,
    pub attendance: Vec<bool>,
    pub formative_one_grading: ActivityStatus,
    pub formative_two_grading: ActivityStatus,
    pub summative_grading: ActivityStatus,
    pub course_moderation: ActivityStatus,
    pub intranet_sync: ActivityStatus,
    pub grade_book_status: ActivityStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_reminder_sent: Option<DateTime<Utc>>,
    pub reminder_count: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityTracker {
    fn statuses(&self) -> [ActivityStatus; 6] {
        [
            self.formative_one_grading,
            self.formative_two_grading,
            self.summative_grading,
            self.course_moderation,
            self.intranet_sync,
            self.grade_book_status,
        ]
    }

    pub fn is_complete(&self) -> bool {
        self.statuses().iter().all(|s| *s == ActivityStatus::Done) && !self.attendance.is_empty()
    }

    /// Six task statuses plus attendance presence, as a rounded 0-100 score.
    pub fn completion_percentage(&self) -> i32 {
        let done = self
            .statuses()
            .iter()
            .filter(|s| **s == ActivityStatus::Done)
            .count() as i32;
        let attendance = i32::from(!self.attendance.is_empty());
        // round-half-up of (points / 7 * 100) in integer arithmetic
        ((done + attendance) * 200 + 7) / 14
    }

    pub fn mark_submitted(&mut self, now: DateTime<Utc>) {
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    pub fn increment_reminder_count(&mut self, now: DateTime<Utc>) {
        self.reminder_count += 1;
        self.last_reminder_sent = Some(now);
        self.updated_at = now;
    }
}

/// Log as returned to API callers: stored fields plus derived state.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogView {
    #[serde(flatten)]
    pub log: ActivityTracker,
    pub is_complete: bool,
    pub completion_percentage: i32,
}

impl From<ActivityTracker> for ActivityLogView {
    fn from(log: ActivityTracker) -> Self {
        Self {
            is_complete: log.is_complete(),
            completion_percentage: log.completion_percentage(),
            log,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn completion_percentage_examples() {
        assert_eq!(tracker(6, vec![true]).completion_percentage(), 100);
        assert_eq!(tracker(4, vec![true, false]).completion_percentage(), 71);
        assert_eq!(tracker(6, vec![]).completion_percentage(), 86);
        assert_eq!(tracker(0, vec![]).completion_percentage(), 0);
        // 1/7 = 14.28, 3/7 = 42.86, 5/7 = 71.43
        assert_eq!(tracker(0, vec![true]).completion_percentage(), 14);
        assert_eq!(tracker(3, vec![]).completion_percentage(), 43);
    }

    #[test]
    fn completion_percentage_stays_in_range() {
        for done in 0..=6 {
            for attendance in [vec![], vec![false]] {
                let pct = tracker(done, attendance).completion_percentage();
                assert!((0..=100).contains(&pct));
            }
        }
    }

    #[test]
    fn complete_requires_every_status_and_attendance() {
        assert!(tracker(6, vec![false]).is_complete());
        assert!(!tracker(6, vec![]).is_complete());
        assert!(!tracker(5, vec![true, true]).is_complete());

        let mut log = tracker(6, vec![true]);
        log.intranet_sync = ActivityStatus::NotStarted;
        assert!(!log.is_complete());
    }

    #[test]
    fn reminder_bookkeeping() {
        let mut log = tracker(0, vec![]);
        log.increment_reminder_count(at(2026, 2, 2, 9));
        log.increment_reminder_count(at(2026, 2, 9, 9));
        assert_eq!(log.reminder_count, 2);
        assert_eq!(log.last_reminder_sent, Some(at(2026, 2, 9, 9)));
    }

    #[test]
    fn activity_status_wire_names() {
        assert_eq!(serde_json::to_string(&ActivityStatus::NotStarted).unwrap(), "\"Not Started\"");
        assert_eq!("Not Started".parse::<ActivityStatus>().unwrap(), ActivityStatus::NotStarted);
        assert_eq!(serde_json::to_string(&IntakePeriod::Ht2).unwrap(), "\"HT2\"");
    }

    fn offering(max: i32, enrolled: i32) -> CourseOffering {
        CourseOffering {
            id: Uuid::new_v4(),
            module_id: Uuid::new_v4(),
            class_id: Uuid::new_v4(),
            cohort_id: Uuid::new_v4(),
            facilitator_id: None,
            mode_id: Uuid::new_v4(),
            trimester: 1,
            intake_period: IntakePeriod::Ft,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 4, 24).unwrap(),
            max_students: max,
            enrolled_students: enrolled,
            status: OfferingStatus::Active,
            notes: None,
            created_at: at(2026, 1, 1, 0),
            updated_at: at(2026, 1, 1, 0),
        }
    }

    #[test]
    fn enrollment_bounds() {
        let mut o = offering(1, 0);
        o.increment_enrollment().unwrap();
        assert!(matches!(o.increment_enrollment(), Err(Error::EnrollmentFull)));
        assert_eq!(o.remaining_slots(), 0);
        assert!(!o.is_open());
        o.decrement_enrollment().unwrap();
        assert!(matches!(o.decrement_enrollment(), Err(Error::NoEnrollment)));
    }

    #[test]
    fn validate_reports_every_bad_field() {
        let mut o = offering(30, 31);
        o.trimester = 4;
        o.end_date = o.start_date;
        let Err(Error::Validation(fields)) = o.validate() else {
            panic!("expected validation failure");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["trimester", "endDate", "enrolledStudents"]);
    }

    #[test]
    fn facilitator_capacity_guard() {
        let mut f = Facilitator {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            department: None,
            max_course_load: 2,
            current_course_load: 2,
            is_available: true,
        };
        assert!(matches!(f.ensure_assignable(), Err(Error::CapacityExceeded { max: 2 })));
        f.current_course_load = 1;
        assert!(f.ensure_assignable().is_ok());
        f.is_available = false;
        assert!(matches!(f.ensure_assignable(), Err(Error::FacilitatorUnavailable)));
    }
}
