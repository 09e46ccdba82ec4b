use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use http::{request::Parts, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use uuid::Uuid;

use crate::activity::{ActivityLogUpdate, NewActivityLog};
use crate::auth::{authorize, authorize_resource, Action, Actor};
use crate::error::{Error, Result};
use crate::models::{ActivityLogView, IntakePeriod, OfferingStatus};
use crate::pagination::{PageQuery, PageRequest, Pagination};
use crate::registry::{NewOffering, OfferingUpdate};
use crate::store::{LogFilter, OfferingFilter, SubmissionFilter};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // activity trackers
        .route("/api/activities", post(create_log).get(list_logs))
        .route("/api/activities/my-logs", get(my_logs))
        .route("/api/activities/summary", get(weekly_summary))
        .route("/api/activities/missing", get(missing_logs))
        .route(
            "/api/activities/:id",
            get(get_log).put(update_log).delete(delete_log),
        )
        // course offerings
        .route("/api/courses", post(create_offering).get(list_offerings))
        .route("/api/courses/my-courses", get(my_courses))
        .route(
            "/api/courses/:id",
            get(get_offering).put(update_offering).delete(delete_offering),
        )
        .route("/api/courses/:id/assign-facilitator", post(assign_facilitator))
        .route("/api/courses/:id/enroll", post(enroll))
        .route("/api/courses/:id/unenroll", post(unenroll))
        .route("/api/facilitators/available", get(available_facilitators))
        .with_state(state)
}

/// JSON body whose rejection renders as a 400 validation failure.
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::validation("body", e.body_text()))?;
        Ok(Body(value))
    }
}

/// Query string with the same 400 treatment as [`Body`].
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::validation("query", e.body_text()))?;
        Ok(Params(value))
    }
}

/// `:id` path segment parsed as a uuid.
pub struct Id(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Id {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|_| Error::validation("id", "Invalid identifier"))?;
        Ok(Id(id))
    }
}

// ---- activity trackers ----

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    allocation_id: Option<Uuid>,
    week_number: Option<i32>,
    facilitator_id: Option<Uuid>,
    status: Option<SubmissionFilter>,
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WeekQuery {
    week_number: Option<i32>,
}

impl WeekQuery {
    fn required(&self) -> Result<i32> {
        self.week_number
            .ok_or_else(|| Error::validation("weekNumber", "Week number is required"))
    }
}

async fn create_log(
    State(state): State<AppState>,
    actor: Actor,
    Body(input): Body<NewActivityLog>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::CreateLog, actor.facilitator_id)?;
    let facilitator_id = actor.require_facilitator()?;
    let log = state.activities.create_log(input, facilitator_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Activity log created successfully",
            "activityLog": ActivityLogView::from(log),
        })),
    ))
}

async fn list_logs(
    State(state): State<AppState>,
    actor: Actor,
    Params(q): Params<LogQuery>,
) -> Result<impl IntoResponse> {
    let mut filter = LogFilter {
        allocation_id: q.allocation_id,
        week_number: q.week_number,
        facilitator_id: q.facilitator_id,
        status: q.status,
    };
    if let Some(own) = actor.facilitator_id.filter(|_| !actor.is_staff()) {
        if filter.facilitator_id.is_some_and(|requested| requested != own) {
            return Err(Error::Forbidden("You can only view your own activity logs".into()));
        }
        filter.facilitator_id = Some(own);
    }
    authorize(&actor, Action::ListLogs, filter.facilitator_id)?;

    let page = PageRequest::new(PageQuery { page: q.page, limit: q.limit }, state.page_limits);
    let logs = state.activities.list_logs(&filter, page).await?.map(ActivityLogView::from);
    Ok(Json(json!({
        "activityLogs": logs.items,
        "pagination": Pagination::new(logs.total, page),
    })))
}

async fn my_logs(
    State(state): State<AppState>,
    actor: Actor,
    Params(q): Params<LogQuery>,
) -> Result<impl IntoResponse> {
    let facilitator_id = actor.require_facilitator()?;
    authorize(&actor, Action::ListLogs, Some(facilitator_id))?;
    let page = PageRequest::new(PageQuery { page: q.page, limit: q.limit }, state.page_limits);
    let logs = state
        .activities
        .facilitator_logs(facilitator_id, q.week_number, q.allocation_id, q.status, page)
        .await?
        .map(ActivityLogView::from);
    Ok(Json(json!({
        "activityLogs": logs.items,
        "pagination": Pagination::new(logs.total, page),
    })))
}

async fn weekly_summary(
    State(state): State<AppState>,
    actor: Actor,
    Params(q): Params<WeekQuery>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewSummary, None)?;
    let summary = state.summary.weekly_summary(q.required()?).await?;
    Ok(Json(summary))
}

async fn missing_logs(
    State(state): State<AppState>,
    actor: Actor,
    Params(q): Params<WeekQuery>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewSummary, None)?;
    let week = q.required()?;
    let missing = state.summary.missing_logs(week).await?;
    Ok(Json(json!({
        "weekNumber": week,
        "missingCount": missing.len(),
        "missingLogs": missing,
    })))
}

async fn get_log(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize_resource(&state.activities, &actor, Action::ReadLog, id, "Activity log").await?;
    let log = state.activities.get_log(id).await?;
    Ok(Json(json!({ "activityLog": ActivityLogView::from(log) })))
}

async fn update_log(
    State(state): State<AppState>,
    actor: Actor,
    Id(id): Id,
    Body(update): Body<ActivityLogUpdate>,
) -> Result<impl IntoResponse> {
    authorize_resource(&state.activities, &actor, Action::UpdateLog, id, "Activity log").await?;
    let log = state.activities.update_log(id, update).await?;
    Ok(Json(json!({
        "message": "Activity log updated successfully",
        "activityLog": ActivityLogView::from(log),
    })))
}

async fn delete_log(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize(&actor, Action::DeleteLog, None)?;
    state.activities.delete_log(id).await?;
    Ok(Json(json!({ "message": "Activity log deleted successfully" })))
}

// ---- course offerings ----

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct OfferingQuery {
    trimester: Option<i32>,
    cohort_id: Option<Uuid>,
    facilitator_id: Option<Uuid>,
    intake_period: Option<IntakePeriod>,
    mode_id: Option<Uuid>,
    status: Option<OfferingStatus>,
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    facilitator_id: Uuid,
}

async fn create_offering(
    State(state): State<AppState>,
    actor: Actor,
    Body(input): Body<NewOffering>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    let offering = state.registry.create_offering(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Course offering created successfully",
            "courseOffering": offering,
        })),
    ))
}

async fn list_offerings(
    State(state): State<AppState>,
    actor: Actor,
    Params(q): Params<OfferingQuery>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewOfferings, None)?;
    let filter = OfferingFilter {
        trimester: q.trimester,
        cohort_id: q.cohort_id,
        facilitator_id: q.facilitator_id,
        intake_period: q.intake_period,
        mode_id: q.mode_id,
        status: q.status,
    };
    let page = PageRequest::new(PageQuery { page: q.page, limit: q.limit }, state.page_limits);
    let offerings = state.registry.list_offerings(&filter, page).await?;
    Ok(Json(json!({
        "courseOfferings": offerings.items,
        "pagination": Pagination::new(offerings.total, page),
    })))
}

async fn my_courses(State(state): State<AppState>, actor: Actor) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewOwnCourses, actor.facilitator_id)?;
    let facilitator_id = actor.require_facilitator()?;
    let offerings = state.registry.facilitator_courses(facilitator_id).await?;
    Ok(Json(json!({ "courseOfferings": offerings })))
}

async fn get_offering(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewOfferings, None)?;
    let offering = state.registry.get_offering(id).await?;
    Ok(Json(json!({ "courseOffering": offering })))
}

async fn update_offering(
    State(state): State<AppState>,
    actor: Actor,
    Id(id): Id,
    Body(update): Body<OfferingUpdate>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    let offering = state.registry.update_offering(id, update).await?;
    Ok(Json(json!({
        "message": "Course offering updated successfully",
        "courseOffering": offering,
    })))
}

async fn delete_offering(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    state.registry.delete_offering(id).await?;
    Ok(Json(json!({ "message": "Course offering deleted successfully" })))
}

async fn assign_facilitator(
    State(state): State<AppState>,
    actor: Actor,
    Id(id): Id,
    Body(req): Body<AssignRequest>,
) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    let offering = state.registry.assign_facilitator(id, req.facilitator_id).await?;
    Ok(Json(json!({
        "message": "Facilitator assigned successfully",
        "courseOffering": offering,
    })))
}

async fn enroll(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    let offering = state.registry.increment_enrollment(id).await?;
    Ok(Json(json!({ "courseOffering": offering })))
}

async fn unenroll(State(state): State<AppState>, actor: Actor, Id(id): Id) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ManageOfferings, None)?;
    let offering = state.registry.decrement_enrollment(id).await?;
    Ok(Json(json!({ "courseOffering": offering })))
}

async fn available_facilitators(State(state): State<AppState>, actor: Actor) -> Result<impl IntoResponse> {
    authorize(&actor, Action::ViewFacilitators, None)?;
    let facilitators = state.registry.available_facilitators().await?;
    Ok(Json(json!({ "facilitators": facilitators })))
}
