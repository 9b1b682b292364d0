use std::sync::{Arc, Mutex};
use std::time::Duration;

use announcer::Scheduler;
use api::{build_router, ApiState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use ledger::errors::{LedgerError, Result};
use ledger::{
    AiDecision, ContributionCounters, DecisionStore, Ledger, UserPatch, UserRecord, UserStore,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

// --- In-memory test double for the store traits ---

#[derive(Default)]
struct StubLedger {
    users: Mutex<Vec<UserRecord>>,
    decisions: Mutex<Vec<AiDecision>>,
}

impl StubLedger {
    fn with_users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Mutex::new(users),
            decisions: Mutex::new(Vec::new()),
        }
    }

    fn position(&self, handle: &str) -> Option<usize> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .position(|user| user.user_handle == handle)
    }
}

#[async_trait::async_trait]
impl UserStore for StubLedger {
    async fn create_user(&self, user: UserRecord) -> Result<String> {
        user.validate()?;
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.user_handle == user.user_handle) {
            return Err(LedgerError::DuplicateHandle(user.user_handle));
        }
        let handle = user.user_handle.clone();
        users.push(user);
        Ok(handle)
    }

    async fn get_user(&self, handle: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.user_handle == handle)
            .cloned())
    }

    async fn update_user(&self, handle: &str, user: UserRecord) -> Result<bool> {
        user.validate()?;
        let Some(index) = self.position(handle) else {
            return Ok(false);
        };
        self.users.lock().unwrap()[index] = user;
        Ok(true)
    }

    async fn update_field(&self, handle: &str, patch: UserPatch) -> Result<bool> {
        patch.validate()?;
        let Some(index) = self.position(handle) else {
            return Ok(false);
        };
        let mut users = self.users.lock().unwrap();
        let user = &mut users[index];
        match patch {
            UserPatch::RenameHandle(new_handle) => user.user_handle = new_handle,
            UserPatch::SetGithubName(name) => user.github_name = name,
            UserPatch::SetRepositories(repos) => user.repositories = repos,
            UserPatch::SetTotalContributions(n) => user.total_daily_contribution_number = n,
            UserPatch::SetTotalQualified(n) => {
                user.total_qualified_daily_contribution_number = n
            }
            UserPatch::SetMonthlyQualified(map) => {
                user.qualified_daily_contribution_number_by_month = map
            }
            UserPatch::SetQualifiedDates(dates) => {
                user.qualified_daily_contribution_dates = dates
            }
            UserPatch::SetBestStreak(n) => user.qualified_daily_contribution_streak = n,
        }
        Ok(true)
    }

    async fn update_counters(&self, handle: &str, counters: ContributionCounters) -> Result<bool> {
        let Some(index) = self.position(handle) else {
            return Ok(false);
        };
        let mut users = self.users.lock().unwrap();
        let user = &mut users[index];
        user.total_daily_contribution_number = counters.total_daily_contribution_number;
        user.total_qualified_daily_contribution_number =
            counters.total_qualified_daily_contribution_number;
        user.qualified_daily_contribution_number_by_month =
            counters.qualified_daily_contribution_number_by_month;
        user.qualified_daily_contribution_dates = counters.qualified_daily_contribution_dates;
        user.qualified_daily_contribution_streak = counters.qualified_daily_contribution_streak;
        Ok(true)
    }

    async fn delete_user(&self, handle: &str) -> Result<bool> {
        let Some(index) = self.position(handle) else {
            return Ok(false);
        };
        self.users.lock().unwrap().remove(index);
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut users = self.users.lock().unwrap().clone();
        users.sort_by(|a, b| a.user_handle.cmp(&b.user_handle));
        Ok(users)
    }
}

#[async_trait::async_trait]
impl DecisionStore for StubLedger {
    async fn add_decisions(&self, handle: &str, decisions: Vec<AiDecision>) -> Result<UserRecord> {
        let user = self
            .get_user(handle)
            .await?
            .ok_or_else(|| LedgerError::UnknownUser(handle.to_string()))?;
        self.decisions.lock().unwrap().extend(decisions);
        Ok(user)
    }

    async fn decisions_for_user(&self, handle: &str) -> Result<Vec<AiDecision>> {
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .iter()
            .filter(|decision| decision.username == handle)
            .cloned()
            .collect())
    }

    async fn decisions_for_user_between(
        &self,
        handle: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AiDecision>> {
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .iter()
            .filter(|decision| {
                decision.username == handle && decision.date >= since && decision.date <= until
            })
            .cloned()
            .collect())
    }
}

impl Ledger for StubLedger {
    fn users(&self) -> &dyn UserStore {
        self
    }

    fn decisions(&self) -> &dyn DecisionStore {
        self
    }
}

fn setup_app(users: Vec<UserRecord>) -> Router {
    let state = Arc::new(ApiState {
        ledger: Arc::new(StubLedger::with_users(users)),
        min_contributions: 10,
        scheduler: Arc::new(Scheduler::new(Duration::from_millis(50))),
    });
    build_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn create_then_fetch_roundtrip() {
    let app = setup_app(Vec::new());

    let created = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/users",
            json!({
                "user_handle": "test_handle",
                "github_name": "test_github",
                "repositories": ["repo1", "repo2"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    assert_eq!(body["user_handle"], "test_handle");
    assert_eq!(body["total_daily_contribution_number"], 0);

    let fetched = app
        .oneshot(get_request("/users/test_handle"))
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = body_json(fetched).await;
    assert_eq!(body["repositories"], json!(["repo1", "repo2"]));
}

#[tokio::test]
async fn duplicate_handle_is_a_conflict() {
    let app = setup_app(vec![UserRecord::new("test_handle", None, vec![])]);
    let response = app
        .oneshot(json_request(
            "POST",
            "/users",
            json!({ "user_handle": "test_handle" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn scalar_repositories_are_rejected() {
    let app = setup_app(Vec::new());
    let response = app
        .oneshot(json_request(
            "POST",
            "/users",
            json!({ "user_handle": "test_handle", "repositories": "repo not list" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_user_is_not_found() {
    let app = setup_app(Vec::new());
    let response = app.oneshot(get_request("/users/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn append_decisions_reprojects_counters() {
    let app = setup_app(vec![UserRecord::new("alice", None, vec!["repo1".into()])]);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/users/alice/decisions",
            json!([
                { "repository": "repo1", "date": "2024-03-01", "is_qualified": true },
                { "repository": "repo2", "date": "2024-03-01", "is_qualified": true },
                { "repository": "repo1", "date": "2024-03-02", "is_qualified": false },
            ]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // Two distinct judged days, one of them qualified.
    assert_eq!(body["total_daily_contribution_number"], 2);
    assert_eq!(body["total_qualified_daily_contribution_number"], 1);
    assert_eq!(
        body["qualified_daily_contribution_number_by_month"]["2024-03"],
        1
    );
    assert_eq!(body["qualified_daily_contribution_streak"], 1);

    let listed = app
        .oneshot(get_request("/users/alice/decisions"))
        .await
        .unwrap();
    let body = body_json(listed).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn decisions_for_unknown_user_are_not_found() {
    let app = setup_app(Vec::new());
    let response = app
        .oneshot(json_request(
            "POST",
            "/users/ghost/decisions",
            json!([{ "repository": "repo1", "date": "2024-03-01", "is_qualified": true }]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn timeframe_query_is_inclusive() {
    let app = setup_app(vec![UserRecord::new("carol", None, vec![])]);
    app.clone()
        .oneshot(json_request(
            "POST",
            "/users/carol/decisions",
            json!([
                { "repository": "repoX", "date": "2024-04-09", "is_qualified": true },
                { "repository": "repoX", "date": "2024-04-10", "is_qualified": true },
                { "repository": "repoX", "date": "2024-04-11", "is_qualified": true },
            ]),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get_request(
            "/users/carol/decisions?since=2024-04-10&until=2024-04-10",
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2024-04-10");
}

#[tokio::test]
async fn rename_patch_moves_the_record() {
    let app = setup_app(vec![UserRecord::new("dave", None, vec![])]);
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            "/users/dave",
            json!({ "field": "rename_handle", "value": "david" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_handle"], "david");

    let old = app.oneshot(get_request("/users/dave")).await.unwrap();
    assert_eq!(old.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_then_fetch_is_not_found() {
    let app = setup_app(vec![UserRecord::new("erin", None, vec![])]);
    let deleted = app
        .clone()
        .oneshot(
            Request::delete("/users/erin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let fetched = app.oneshot(get_request("/users/erin")).await.unwrap();
    assert_eq!(fetched.status(), StatusCode::NOT_FOUND);
}

fn ranked_user(handle: &str, monthly: i64) -> UserRecord {
    let mut user = UserRecord::new(handle, None, vec![]);
    user.total_qualified_daily_contribution_number = monthly;
    user.qualified_daily_contribution_number_by_month
        .insert("2024-03".into(), monthly);
    user
}

#[tokio::test]
async fn leaderboard_filters_and_ranks() {
    let app = setup_app(vec![
        ranked_user("busy", 15),
        ranked_user("busier", 20),
        ranked_user("quiet", 3),
    ]);
    let response = app
        .clone()
        .oneshot(get_request("/leaderboard/2024-03"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["month"], "2024-03");
    assert_eq!(body["min_contributions"], 10);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], "busier");
    assert_eq!(rows[1][1], "busy");

    // A caller-supplied filter overrides the default.
    let response = app
        .oneshot(get_request("/leaderboard/2024-03?min=1"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_month_is_a_bad_request() {
    let app = setup_app(Vec::new());
    for uri in ["/leaderboard/2024-3", "/streaks/march", "/leaderboard/2024-13"] {
        let response = app.clone().oneshot(get_request(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn streak_report_ratchets_the_best_streak() {
    let mut user = UserRecord::new("alice", None, vec![]);
    for d in 1..=3 {
        user.qualified_daily_contribution_dates
            .insert(day(2024, 3, d));
    }
    let app = setup_app(vec![user]);

    let response = app
        .clone()
        .oneshot(get_request("/streaks/2024-03"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let streaks = body["streaks"].as_array().unwrap();
    assert_eq!(streaks.len(), 1);
    assert_eq!(streaks[0]["user_handle"], "alice");
    assert_eq!(streaks[0]["length"], 3);
    assert_eq!(body["updated"], json!(["alice"]));

    let fetched = app.oneshot(get_request("/users/alice")).await.unwrap();
    let body = body_json(fetched).await;
    assert_eq!(body["qualified_daily_contribution_streak"], 3);
}

#[tokio::test]
async fn users_export_is_csv() {
    let app = setup_app(vec![ranked_user("busy", 15)]);
    let response = app
        .oneshot(get_request("/export/users.csv"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/csv"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("User Handle,Github Name"));
    assert!(text.contains("busy"));
}

#[tokio::test]
async fn user_month_export_tracks_a_running_total() {
    let app = setup_app(vec![UserRecord::new("carol", None, vec![])]);
    app.clone()
        .oneshot(json_request(
            "POST",
            "/users/carol/decisions",
            json!([
                { "repository": "repoX", "date": "2024-04-01", "is_qualified": true },
                { "repository": "repoX", "date": "2024-04-02", "is_qualified": false },
                { "repository": "repoX", "date": "2024-05-01", "is_qualified": true },
            ]),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/export/users/carol/2024-04.csv"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "username,date,is_qualified,total_qualified_so_far",
            "carol,2024-04-01,true,1",
            "carol,2024-04-02,false,1",
        ]
    );

    let missing = app
        .oneshot(get_request("/export/users/ghost/2024-04.csv"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn announcement_jobs_start_and_stop() {
    let app = setup_app(Vec::new());

    let started = app
        .clone()
        .oneshot(
            Request::post("/announcements/2024-03/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);
    let body = body_json(started).await;
    assert_eq!(body["name"], "announce-2024-03");
    assert_eq!(body["state"], "running");

    let again = app
        .clone()
        .oneshot(
            Request::post("/announcements/2024-03/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let listed = app
        .clone()
        .oneshot(get_request("/announcements"))
        .await
        .unwrap();
    let body = body_json(listed).await;
    assert_eq!(body[0]["state"], "running");

    let stopped = app
        .clone()
        .oneshot(
            Request::post("/announcements/2024-03/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    let body = body_json(stopped).await;
    assert_eq!(body["state"], "cancelled");

    let stopped_again = app
        .oneshot(
            Request::post("/announcements/2024-03/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stopped_again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = setup_app(vec![UserRecord::new("alice", None, vec![])]);
    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ledger_users_tracked"));
}
