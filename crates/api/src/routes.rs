use std::sync::Arc;

use announcer::{JobState, Schedule, Scheduler};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use common::Month;
use engine::{build_leaderboard, monthly_streaks, monthly_tallies, project_counters};
use ledger::{Ledger, UserPatch, UserRecord};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::dto::{DecisionDto, DecisionPayload, JobDto, StreakReportDto};
use crate::error::{ApiError, ApiResult};
use crate::metrics;

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<dyn Ledger>,
    pub min_contributions: i64,
    pub scheduler: Arc<Scheduler>,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:handle",
            get(get_user)
                .put(update_user)
                .patch(patch_user)
                .delete(delete_user),
        )
        .route(
            "/users/:handle/decisions",
            get(list_decisions).post(append_decisions),
        )
        .route("/leaderboard", get(current_leaderboard))
        .route("/leaderboard/:month", get(leaderboard))
        .route("/streaks", get(current_streaks))
        .route("/streaks/:month", get(streaks))
        .route("/export/users.csv", get(export_users))
        .route("/export/users/:handle/:month", get(export_user_month))
        .route("/announcements", get(list_announcements))
        .route("/announcements/:month/start", post(start_announcement))
        .route("/announcements/:month/stop", post(stop_announcement))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[instrument(skip(state))]
async fn list_users(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Vec<UserRecord>>> {
    let users = state.ledger.users().list_users().await?;
    Ok(Json(users))
}

#[instrument(skip(state, doc))]
async fn create_user(
    State(state): State<Arc<ApiState>>,
    Json(doc): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    let user = UserRecord::from_document(doc)?;
    let handle = state.ledger.users().create_user(user).await?;
    metrics::USERS_CREATED_TOTAL.inc();
    let created = state
        .ledger
        .users()
        .get_user(&handle)
        .await?
        .ok_or_else(|| ApiError::Internal("created user vanished".into()))?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state))]
async fn get_user(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
) -> ApiResult<Json<UserRecord>> {
    let user = state
        .ledger
        .users()
        .get_user(&handle)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("user {} not found", handle)))?;
    Ok(Json(user))
}

#[instrument(skip(state, doc))]
async fn update_user(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
    Json(doc): Json<serde_json::Value>,
) -> ApiResult<Json<UserRecord>> {
    let user = UserRecord::from_document(doc)?;
    let target = user.user_handle.clone();
    let updated = state.ledger.users().update_user(&handle, user).await?;
    if !updated {
        return Err(ApiError::not_found(format!("user {} not found", handle)));
    }
    let user = state
        .ledger
        .users()
        .get_user(&target)
        .await?
        .ok_or_else(|| ApiError::Internal("updated user vanished".into()))?;
    Ok(Json(user))
}

#[instrument(skip(state, patch))]
async fn patch_user(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<Json<UserRecord>> {
    patch.validate()?;
    let target = match &patch {
        UserPatch::RenameHandle(new_handle) => new_handle.clone(),
        _ => handle.clone(),
    };
    let updated = state.ledger.users().update_field(&handle, patch).await?;
    if !updated {
        return Err(ApiError::not_found(format!("user {} not found", handle)));
    }
    let user = state
        .ledger
        .users()
        .get_user(&target)
        .await?
        .ok_or_else(|| ApiError::Internal("patched user vanished".into()))?;
    Ok(Json(user))
}

#[instrument(skip(state))]
async fn delete_user(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
) -> ApiResult<StatusCode> {
    let deleted = state.ledger.users().delete_user(&handle).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("user {} not found", handle)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DecisionsQuery {
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
}

#[instrument(skip(state))]
async fn list_decisions(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
    Query(query): Query<DecisionsQuery>,
) -> ApiResult<Json<Vec<DecisionDto>>> {
    let decisions = match (query.since, query.until) {
        (None, None) => state.ledger.decisions().decisions_for_user(&handle).await?,
        (since, until) => {
            // Open-ended bounds stay inside the range Postgres DATE accepts.
            let since =
                since.unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date"));
            let until =
                until.unwrap_or_else(|| NaiveDate::from_ymd_opt(9999, 12, 31).expect("valid date"));
            if since > until {
                return Err(ApiError::bad_request("since must not be after until"));
            }
            state
                .ledger
                .decisions()
                .decisions_for_user_between(&handle, since, until)
                .await?
        }
    };
    Ok(Json(decisions.into_iter().map(DecisionDto::from).collect()))
}

/// Appends classifier decisions, then reprojects and persists the user's
/// counters from the full decision history.
#[instrument(skip(state, payloads), fields(count = payloads.len()))]
async fn append_decisions(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
    Json(payloads): Json<Vec<DecisionPayload>>,
) -> ApiResult<Json<UserRecord>> {
    let appended = payloads.len();
    let decisions = payloads
        .into_iter()
        .map(|payload| payload.into_decision(&handle))
        .collect();
    let user = state
        .ledger
        .decisions()
        .add_decisions(&handle, decisions)
        .await?;
    metrics::DECISIONS_APPENDED_TOTAL.inc_by(appended as u64);

    let history = state.ledger.decisions().decisions_for_user(&handle).await?;
    let counters = project_counters(&history, user.qualified_daily_contribution_streak);
    state
        .ledger
        .users()
        .update_counters(&handle, counters)
        .await?;

    let user = state
        .ledger
        .users()
        .get_user(&handle)
        .await?
        .ok_or_else(|| ApiError::Internal("user vanished during projection".into()))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    min: Option<i64>,
}

#[instrument(skip(state))]
async fn leaderboard(
    State(state): State<Arc<ApiState>>,
    Path(month): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let month: Month = month.parse()?;
    build_board(state, month, query).await
}

/// No month in the path means the current calendar month.
#[instrument(skip(state))]
async fn current_leaderboard(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    build_board(state, Month::current(), query).await
}

async fn build_board(
    state: Arc<ApiState>,
    month: Month,
    query: LeaderboardQuery,
) -> ApiResult<Json<serde_json::Value>> {
    let min = query.min.unwrap_or(state.min_contributions);
    let users = state.ledger.users().list_users().await?;
    let board = build_leaderboard(&users, month, min);
    metrics::REPORTS_BUILT_TOTAL
        .with_label_values(&["leaderboard"])
        .inc();
    Ok(Json(json!({
        "month": month.key(),
        "min_contributions": min,
        "header": board.header,
        "rows": board.rows,
    })))
}

/// Computes the monthly streak report and applies any all-time best
/// ratchets it produced before answering.
#[instrument(skip(state))]
async fn streaks(
    State(state): State<Arc<ApiState>>,
    Path(month): Path<String>,
) -> ApiResult<Json<StreakReportDto>> {
    let month: Month = month.parse()?;
    build_streak_report(state, month).await
}

#[instrument(skip(state))]
async fn current_streaks(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<StreakReportDto>> {
    build_streak_report(state, Month::current()).await
}

async fn build_streak_report(
    state: Arc<ApiState>,
    month: Month,
) -> ApiResult<Json<StreakReportDto>> {
    let users = state.ledger.users().list_users().await?;
    let report = monthly_streaks(&users, month);
    for update in &report.updates {
        let applied = state
            .ledger
            .users()
            .update_field(&update.user_handle, UserPatch::SetBestStreak(update.best))
            .await?;
        if !applied {
            warn!(handle = %update.user_handle, "streak update targeted a vanished user");
        }
    }
    metrics::REPORTS_BUILT_TOTAL
        .with_label_values(&["streaks"])
        .inc();
    Ok(Json(StreakReportDto::from_report(month.key(), report)))
}

#[instrument(skip(state))]
async fn export_users(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    let users = state.ledger.users().list_users().await?;
    let body = export::users_csv(&users);
    Ok(csv_response(body))
}

#[instrument(skip(state))]
async fn export_user_month(
    State(state): State<Arc<ApiState>>,
    Path((handle, month)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    // Accepts both "2024-03" and "2024-03.csv".
    let month: Month = month.strip_suffix(".csv").unwrap_or(&month).parse()?;
    if state.ledger.users().get_user(&handle).await?.is_none() {
        return Err(ApiError::not_found(format!("user {} not found", handle)));
    }
    let decisions = state
        .ledger
        .decisions()
        .decisions_for_user_between(&handle, month.first_day(), month.last_day())
        .await?;
    let tallies = monthly_tallies(&decisions, month);
    let body = export::user_month_csv(&handle, &tallies);
    Ok(csv_response(body))
}

fn csv_response(body: String) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/csv")],
        body,
    )
}

#[instrument(skip(state))]
async fn list_announcements(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Vec<JobDto>>> {
    let jobs = state
        .scheduler
        .jobs()
        .into_iter()
        .map(|(name, job_state)| JobDto {
            name,
            state: job_state.as_str(),
        })
        .collect();
    Ok(Json(jobs))
}

#[instrument(skip(state))]
async fn start_announcement(
    State(state): State<Arc<ApiState>>,
    Path(month): Path<String>,
) -> ApiResult<Json<JobDto>> {
    let month: Month = month.parse()?;
    let name = announcer::monthly_job_name(month.year(), month.month());

    match state.scheduler.state(&name) {
        Some(JobState::Running) => {
            return Err(ApiError::Conflict(format!("job {} is already running", name)));
        }
        Some(JobState::Idle) => {}
        _ => {
            let ledger = Arc::clone(&state.ledger);
            let min = state.min_contributions;
            let job: announcer::JobFn = Arc::new(move || {
                let ledger = Arc::clone(&ledger);
                Box::pin(async move {
                    announce_leaderboard(ledger, month, min).await;
                })
            });
            state
                .scheduler
                .register(&name, Schedule::Daily { hour: 0, minute: 0 }, job)?;
        }
    }

    state.scheduler.start(&name)?;
    Ok(Json(JobDto {
        name,
        state: JobState::Running.as_str(),
    }))
}

async fn announce_leaderboard(ledger: Arc<dyn Ledger>, month: Month, min: i64) {
    match ledger.users().list_users().await {
        Ok(users) => {
            let board = build_leaderboard(&users, month, min);
            info!(
                month = %month,
                ranked = board.rows.len(),
                "daily leaderboard announcement"
            );
            for row in board.rows.iter().take(10) {
                info!(rank = %row[0], handle = %row[1], qualified = %row[6], "leaderboard entry");
            }
        }
        Err(err) => warn!(error = %err, "announcement skipped, user listing failed"),
    }
}

#[instrument(skip(state))]
async fn stop_announcement(
    State(state): State<Arc<ApiState>>,
    Path(month): Path<String>,
) -> ApiResult<Json<JobDto>> {
    let month: Month = month.parse()?;
    let name = announcer::monthly_job_name(month.year(), month.month());
    if !state.scheduler.stop(&name) {
        return Err(ApiError::not_found(format!("no running job {}", name)));
    }
    Ok(Json(JobDto {
        name,
        state: JobState::Cancelled.as_str(),
    }))
}

#[instrument(skip(state))]
async fn render_metrics(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    match state.ledger.users().list_users().await {
        Ok(users) => metrics::USERS_TRACKED.set(users.len() as i64),
        Err(err) => warn!(error = %err, "failed to refresh tracked-user gauge"),
    }
    let (content_type, buffer) =
        metrics::render().map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, content_type)],
        buffer,
    ))
}
