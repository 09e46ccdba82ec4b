use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use super::{LogFilter, LogWithContext, OfferingFilter, Store, StoreTx, SubmissionFilter};
use crate::db::Db;
use crate::error::{classify_db_error, Error, Result};
use crate::models::{
    ActivityTracker, CourseOffering, Facilitator, FacilitatorContact, ManagerContact,
    OfferingDetails, OfferingKey, OfferingStatus,
};
use crate::pagination::{Page, PageRequest};

const OFFERING_COLUMNS: &str = "o.id, o.module_id, o.class_id, o.cohort_id, o.facilitator_id, \
     o.mode_id, o.trimester, o.intake_period, o.start_date, o.end_date, o.max_students, \
     o.enrolled_students, o.status, o.notes, o.created_at, o.updated_at";

const OFFERING_DETAILS_FROM: &str = r#"
    , m.name AS module_name, c.name AS class_name, co.name AS cohort_name, mo.name AS mode_name,
      f.max_course_load AS f_max_course_load, f.current_course_load AS f_current_course_load,
      f.is_available AS f_is_available, u.first_name AS f_first_name,
      u.last_name AS f_last_name, u.email AS f_email
    FROM course_offerings o
    JOIN modules m ON m.id = o.module_id
    JOIN classes c ON c.id = o.class_id
    JOIN cohorts co ON co.id = o.cohort_id
    JOIN modes mo ON mo.id = o.mode_id
    LEFT JOIN facilitators f ON f.id = o.facilitator_id
    LEFT JOIN users u ON u.id = f.user_id
    WHERE o.deleted_at IS NULL
"#;

const LOG_COLUMNS: &str = "a.id, a.allocation_id, a.week_number, a.attendance, \
     a.formative_one_grading, a.formative_two_grading, a.summative_grading, a.course_moderation, \
     a.intranet_sync, a.grade_book_status, a.submitted_at, a.last_reminder_sent, \
     a.reminder_count, a.notes, a.created_at, a.updated_at";

const FACILITATOR_COLUMNS: &str =
    "f.id, f.user_id, f.department, f.max_course_load, f.current_course_load, f.is_available";

fn offering_from_row(row: &PgRow) -> Result<CourseOffering> {
    Ok(CourseOffering {
        id: row.try_get("id")?,
        module_id: row.try_get("module_id")?,
        class_id: row.try_get("class_id")?,
        cohort_id: row.try_get("cohort_id")?,
        facilitator_id: row.try_get("facilitator_id")?,
        mode_id: row.try_get("mode_id")?,
        trimester: row.try_get("trimester")?,
        intake_period: row.try_get::<String, _>("intake_period")?.parse()?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        max_students: row.try_get("max_students")?,
        enrolled_students: row.try_get("enrolled_students")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Facilitator columns prefixed `f_` by the details join, if one is assigned.
fn joined_contact(row: &PgRow, facilitator_id: Option<Uuid>) -> Result<Option<FacilitatorContact>> {
    let Some(id) = facilitator_id else {
        return Ok(None);
    };
    let Some(first_name) = row.try_get::<Option<String>, _>("f_first_name")? else {
        return Ok(None);
    };
    let last_name: String = row.try_get::<Option<String>, _>("f_last_name")?.unwrap_or_default();
    Ok(Some(FacilitatorContact {
        id,
        full_name: format!("{first_name} {last_name}"),
        email: row.try_get::<Option<String>, _>("f_email")?.unwrap_or_default(),
        max_course_load: row.try_get::<Option<i32>, _>("f_max_course_load")?.unwrap_or_default(),
        current_course_load: row
            .try_get::<Option<i32>, _>("f_current_course_load")?
            .unwrap_or_default(),
        is_available: row.try_get::<Option<bool>, _>("f_is_available")?.unwrap_or_default(),
    }))
}

fn details_from_row(row: &PgRow) -> Result<OfferingDetails> {
    let offering = offering_from_row(row)?;
    let facilitator = joined_contact(row, offering.facilitator_id)?;
    Ok(OfferingDetails {
        module_name: row.try_get("module_name")?,
        class_name: row.try_get("class_name")?,
        cohort_name: row.try_get("cohort_name")?,
        mode_name: row.try_get("mode_name")?,
        facilitator,
        offering,
    })
}

fn log_from_row(row: &PgRow) -> Result<ActivityTracker> {
    Ok(ActivityTracker {
        id: row.try_get("id")?,
        allocation_id: row.try_get("allocation_id")?,
        week_number: row.try_get("week_number")?,
        attendance: row.try_get::<Json<Vec<bool>>, _>("attendance")?.0,
        formative_one_grading: row.try_get::<String, _>("formative_one_grading")?.parse()?,
        formative_two_grading: row.try_get::<String, _>("formative_two_grading")?.parse()?,
        summative_grading: row.try_get::<String, _>("summative_grading")?.parse()?,
        course_moderation: row.try_get::<String, _>("course_moderation")?.parse()?,
        intranet_sync: row.try_get::<String, _>("intranet_sync")?.parse()?,
        grade_book_status: row.try_get::<String, _>("grade_book_status")?.parse()?,
        submitted_at: row.try_get("submitted_at")?,
        last_reminder_sent: row.try_get("last_reminder_sent")?,
        reminder_count: row.try_get("reminder_count")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn facilitator_from_row(row: &PgRow) -> Result<Facilitator> {
    Ok(Facilitator {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        department: row.try_get("department")?,
        max_course_load: row.try_get("max_course_load")?,
        current_course_load: row.try_get("current_course_load")?,
        is_available: row.try_get("is_available")?,
    })
}

fn contact_from_row(row: &PgRow) -> Result<FacilitatorContact> {
    let first: String = row.try_get("first_name")?;
    let last: String = row.try_get("last_name")?;
    Ok(FacilitatorContact {
        id: row.try_get("id")?,
        full_name: format!("{first} {last}"),
        email: row.try_get("email")?,
        max_course_load: row.try_get("max_course_load")?,
        current_course_load: row.try_get("current_course_load")?,
        is_available: row.try_get("is_available")?,
    })
}

fn push_offering_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &OfferingFilter) {
    if let Some(t) = filter.trimester {
        qb.push(" AND o.trimester = ").push_bind(t);
    }
    if let Some(c) = filter.cohort_id {
        qb.push(" AND o.cohort_id = ").push_bind(c);
    }
    if let Some(f) = filter.facilitator_id {
        qb.push(" AND o.facilitator_id = ").push_bind(f);
    }
    if let Some(p) = filter.intake_period {
        qb.push(" AND o.intake_period = ").push_bind(p.as_str());
    }
    if let Some(m) = filter.mode_id {
        qb.push(" AND o.mode_id = ").push_bind(m);
    }
    if let Some(s) = filter.status {
        qb.push(" AND o.status = ").push_bind(s.as_str());
    }
}

fn push_log_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &LogFilter) {
    if let Some(a) = filter.allocation_id {
        qb.push(" AND a.allocation_id = ").push_bind(a);
    }
    if let Some(w) = filter.week_number {
        qb.push(" AND a.week_number = ").push_bind(w);
    }
    if let Some(f) = filter.facilitator_id {
        qb.push(" AND o.facilitator_id = ").push_bind(f);
    }
    match filter.status {
        Some(SubmissionFilter::Complete) => {
            qb.push(" AND a.submitted_at IS NOT NULL");
        }
        Some(SubmissionFilter::Incomplete) => {
            qb.push(" AND a.submitted_at IS NULL");
        }
        None => {}
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn offerings_where(&self, clause: &str, id: Option<Uuid>) -> Result<Vec<OfferingDetails>> {
        let sql = format!("SELECT {OFFERING_COLUMNS} {OFFERING_DETAILS_FROM} {clause}");
        let mut query = sqlx::query(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.db).await?;
        rows.iter().map(details_from_row).collect()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn offering(&self, id: Uuid) -> Result<Option<CourseOffering>> {
        let sql = format!(
            "SELECT {OFFERING_COLUMNS} FROM course_offerings o WHERE o.id = $1 AND o.deleted_at IS NULL"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.db).await?;
        row.as_ref().map(offering_from_row).transpose()
    }

    async fn offering_details(&self, id: Uuid) -> Result<Option<OfferingDetails>> {
        Ok(self
            .offerings_where("AND o.id = $1", Some(id))
            .await?
            .into_iter()
            .next())
    }

    async fn list_offerings(
        &self,
        filter: &OfferingFilter,
        page: PageRequest,
    ) -> Result<Page<OfferingDetails>> {
        let mut count = QueryBuilder::new(
            "SELECT COUNT(*) FROM course_offerings o WHERE o.deleted_at IS NULL",
        );
        push_offering_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {OFFERING_COLUMNS} {OFFERING_DETAILS_FROM}"));
        push_offering_filter(&mut qb, filter);
        qb.push(" ORDER BY o.created_at DESC, o.id LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.db).await?;
        let items = rows.iter().map(details_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    async fn active_offerings(&self) -> Result<Vec<OfferingDetails>> {
        self.offerings_where("AND o.status = 'active' ORDER BY o.created_at DESC", None)
            .await
    }

    async fn count_active_offerings(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM course_offerings WHERE status = $1 AND deleted_at IS NULL",
        )
        .bind(OfferingStatus::Active.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }

    async fn facilitator_offerings(&self, facilitator_id: Uuid) -> Result<Vec<OfferingDetails>> {
        self.offerings_where(
            "AND o.facilitator_id = $1 AND o.status IN ('planned', 'active') ORDER BY o.start_date",
            Some(facilitator_id),
        )
        .await
    }

    async fn facilitator(&self, id: Uuid) -> Result<Option<Facilitator>> {
        let sql = format!(
            "SELECT {FACILITATOR_COLUMNS} FROM facilitators f WHERE f.id = $1 AND f.deleted_at IS NULL"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.db).await?;
        row.as_ref().map(facilitator_from_row).transpose()
    }

    async fn facilitator_contact(&self, id: Uuid) -> Result<Option<FacilitatorContact>> {
        let row = sqlx::query(
            r#"
            SELECT f.id, u.first_name, u.last_name, u.email,
                   f.max_course_load, f.current_course_load, f.is_available
            FROM facilitators f JOIN users u ON u.id = f.user_id
            WHERE f.id = $1 AND f.deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn available_facilitators(&self) -> Result<Vec<FacilitatorContact>> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, u.first_name, u.last_name, u.email,
                   f.max_course_load, f.current_course_load, f.is_available
            FROM facilitators f JOIN users u ON u.id = f.user_id
            WHERE f.deleted_at IS NULL AND f.is_available
              AND f.current_course_load < f.max_course_load
            ORDER BY f.current_course_load ASC, u.first_name, u.last_name
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn active_managers(&self) -> Result<Vec<ManagerContact>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, u.first_name, u.last_name, u.email
            FROM managers m JOIN users u ON u.id = m.user_id
            WHERE m.deleted_at IS NULL AND u.is_active AND u.deleted_at IS NULL
            ORDER BY u.email
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| {
                let first: String = row.try_get("first_name")?;
                let last: String = row.try_get("last_name")?;
                Ok(ManagerContact {
                    id: row.try_get("id")?,
                    full_name: format!("{first} {last}"),
                    email: row.try_get("email")?,
                })
            })
            .collect()
    }

    async fn insert_log(&self, log: &ActivityTracker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_trackers
                (id, allocation_id, week_number, attendance, formative_one_grading,
                 formative_two_grading, summative_grading, course_moderation, intranet_sync,
                 grade_book_status, submitted_at, last_reminder_sent, reminder_count, notes,
                 created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "#,
        )
        .bind(log.id)
        .bind(log.allocation_id)
        .bind(log.week_number)
        .bind(Json(&log.attendance))
        .bind(log.formative_one_grading.as_str())
        .bind(log.formative_two_grading.as_str())
        .bind(log.summative_grading.as_str())
        .bind(log.course_moderation.as_str())
        .bind(log.intranet_sync.as_str())
        .bind(log.grade_book_status.as_str())
        .bind(log.submitted_at)
        .bind(log.last_reminder_sent)
        .bind(log.reminder_count)
        .bind(&log.notes)
        .bind(log.created_at)
        .bind(log.updated_at)
        .execute(&self.db)
        .await
        .map_err(|e| {
            classify_db_error(
                e,
                Error::DuplicateLog {
                    week: log.week_number,
                },
            )
        })?;
        Ok(())
    }

    async fn log(&self, id: Uuid) -> Result<Option<ActivityTracker>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM activity_trackers a WHERE a.id = $1 AND a.deleted_at IS NULL"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.db).await?;
        row.as_ref().map(log_from_row).transpose()
    }

    async fn find_log(&self, allocation_id: Uuid, week_number: i32) -> Result<Option<ActivityTracker>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM activity_trackers a \
             WHERE a.allocation_id = $1 AND a.week_number = $2 AND a.deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(allocation_id)
            .bind(week_number)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(log_from_row).transpose()
    }

    async fn save_log(&self, log: &ActivityTracker) -> Result<ActivityTracker> {
        let sql = format!(
            r#"
            UPDATE activity_trackers AS a SET
                attendance = $2, formative_one_grading = $3, formative_two_grading = $4,
                summative_grading = $5, course_moderation = $6, intranet_sync = $7,
                grade_book_status = $8, submitted_at = $9, notes = $10, updated_at = $11
            WHERE a.id = $1 AND a.deleted_at IS NULL
            RETURNING {LOG_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(log.id)
            .bind(Json(&log.attendance))
            .bind(log.formative_one_grading.as_str())
            .bind(log.formative_two_grading.as_str())
            .bind(log.summative_grading.as_str())
            .bind(log.course_moderation.as_str())
            .bind(log.intranet_sync.as_str())
            .bind(log.grade_book_status.as_str())
            .bind(log.submitted_at)
            .bind(&log.notes)
            .bind(log.updated_at)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => log_from_row(&row),
            None => Err(Error::NotFound("Activity log")),
        }
    }

    async fn record_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<ActivityTracker> {
        let sql = format!(
            r#"
            UPDATE activity_trackers AS a SET
                reminder_count = a.reminder_count + 1, last_reminder_sent = $2, updated_at = $2
            WHERE a.id = $1 AND a.deleted_at IS NULL
            RETURNING {LOG_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql).bind(id).bind(at).fetch_optional(&self.db).await?;
        match row {
            Some(row) => log_from_row(&row),
            None => Err(Error::NotFound("Activity log")),
        }
    }

    async fn soft_delete_log(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE activity_trackers SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_logs(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<ActivityTracker>> {
        const FROM: &str = " FROM activity_trackers a \
             JOIN course_offerings o ON o.id = a.allocation_id AND o.deleted_at IS NULL \
             WHERE a.deleted_at IS NULL";

        let mut count = QueryBuilder::new(format!("SELECT COUNT(*){FROM}"));
        push_log_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {LOG_COLUMNS}{FROM}"));
        push_log_filter(&mut qb, filter);
        qb.push(" ORDER BY a.week_number DESC, a.created_at DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.db).await?;
        let items = rows.iter().map(log_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    async fn logs_for_week(&self, week_number: i32) -> Result<Vec<LogWithContext>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}, o.facilitator_id, m.name AS module_name,
                   f.max_course_load AS f_max_course_load,
                   f.current_course_load AS f_current_course_load,
                   f.is_available AS f_is_available, u.first_name AS f_first_name,
                   u.last_name AS f_last_name, u.email AS f_email
            FROM activity_trackers a
            JOIN course_offerings o ON o.id = a.allocation_id AND o.deleted_at IS NULL
            JOIN modules m ON m.id = o.module_id
            LEFT JOIN facilitators f ON f.id = o.facilitator_id
            LEFT JOIN users u ON u.id = f.user_id
            WHERE a.week_number = $1 AND a.deleted_at IS NULL
            ORDER BY a.created_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(week_number)
            .fetch_all(&self.db)
            .await?;
        rows.iter()
            .map(|row| {
                let facilitator_id: Option<Uuid> = row.try_get("facilitator_id")?;
                Ok(LogWithContext {
                    log: log_from_row(row)?,
                    course_name: row.try_get("module_name")?,
                    facilitator: joined_contact(row, facilitator_id)?,
                })
            })
            .collect()
    }

    async fn log_owner(&self, log_id: Uuid) -> Result<Option<Option<Uuid>>> {
        let row = sqlx::query(
            r#"
            SELECT o.facilitator_id
            FROM activity_trackers a JOIN course_offerings o ON o.id = a.allocation_id
            WHERE a.id = $1 AND a.deleted_at IS NULL
            "#,
        )
        .bind(log_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| r.try_get::<Option<Uuid>, _>("facilitator_id"))
            .transpose()
            .map_err(Error::from)
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn offering(&mut self, id: Uuid) -> Result<Option<CourseOffering>> {
        let sql = format!(
            "SELECT {OFFERING_COLUMNS} FROM course_offerings o \
             WHERE o.id = $1 AND o.deleted_at IS NULL FOR UPDATE"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(offering_from_row).transpose()
    }

    async fn find_offering_by_key(
        &mut self,
        key: &OfferingKey,
        exclude: Option<Uuid>,
    ) -> Result<Option<CourseOffering>> {
        let sql = format!(
            "SELECT {OFFERING_COLUMNS} FROM course_offerings o \
             WHERE o.module_id = $1 AND o.class_id = $2 AND o.cohort_id = $3 \
               AND o.trimester = $4 AND o.intake_period = $5 AND o.deleted_at IS NULL \
               AND ($6::uuid IS NULL OR o.id <> $6) \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(key.module_id)
            .bind(key.class_id)
            .bind(key.cohort_id)
            .bind(key.trimester)
            .bind(key.intake_period.as_str())
            .bind(exclude)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(offering_from_row).transpose()
    }

    async fn insert_offering(&mut self, o: &CourseOffering) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO course_offerings
                (id, module_id, class_id, cohort_id, facilitator_id, mode_id, trimester,
                 intake_period, start_date, end_date, max_students, enrolled_students, status,
                 notes, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "#,
        )
        .bind(o.id)
        .bind(o.module_id)
        .bind(o.class_id)
        .bind(o.cohort_id)
        .bind(o.facilitator_id)
        .bind(o.mode_id)
        .bind(o.trimester)
        .bind(o.intake_period.as_str())
        .bind(o.start_date)
        .bind(o.end_date)
        .bind(o.max_students)
        .bind(o.enrolled_students)
        .bind(o.status.as_str())
        .bind(&o.notes)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify_db_error(e, Error::DuplicateOffering))?;
        Ok(())
    }

    async fn update_offering(&mut self, o: &CourseOffering) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE course_offerings SET
                module_id = $2, class_id = $3, cohort_id = $4, facilitator_id = $5, mode_id = $6,
                trimester = $7, intake_period = $8, start_date = $9, end_date = $10,
                max_students = $11, enrolled_students = $12, status = $13, notes = $14,
                updated_at = $15
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(o.id)
        .bind(o.module_id)
        .bind(o.class_id)
        .bind(o.cohort_id)
        .bind(o.facilitator_id)
        .bind(o.mode_id)
        .bind(o.trimester)
        .bind(o.intake_period.as_str())
        .bind(o.start_date)
        .bind(o.end_date)
        .bind(o.max_students)
        .bind(o.enrolled_students)
        .bind(o.status.as_str())
        .bind(&o.notes)
        .bind(o.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify_db_error(e, Error::DuplicateOffering))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Course offering"));
        }
        Ok(())
    }

    async fn soft_delete_offering(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE course_offerings SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Course offering"));
        }
        sqlx::query(
            "UPDATE activity_trackers SET deleted_at = $2 WHERE allocation_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn facilitator(&mut self, id: Uuid) -> Result<Option<Facilitator>> {
        let sql = format!(
            "SELECT {FACILITATOR_COLUMNS} FROM facilitators f \
             WHERE f.id = $1 AND f.deleted_at IS NULL FOR UPDATE"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(facilitator_from_row).transpose()
    }

    async fn set_facilitator_load(&mut self, id: Uuid, load: i32, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE facilitators SET current_course_load = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(load)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Facilitator"));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
