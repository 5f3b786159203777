//! HTTP facade: application state, router assembly, and serving.

use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::db::Store;
use crate::ingest::MAX_UPLOAD_BYTES;
use crate::live::LiveManager;
use crate::providers::{build_extractor, build_transcriber, Extractor, Transcriber};
use crate::zoom::ZoomClient;

mod admin_routes;
pub mod auth;
mod issue_routes;
mod live_routes;
mod meeting_routes;
mod zoom_routes;

/// Shared application state. The store mutex is the single-writer gate for
/// all persistence; everything else is immutable or internally synchronised.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Store>>,
    pub config: Arc<Config>,
    pub live: Arc<LiveManager>,
    pub transcriber: Arc<dyn Transcriber>,
    pub extractor: Arc<dyn Extractor>,
    pub zoom: Arc<ZoomClient>,
}

impl AppState {
    /// Wire up providers and the live manager around an opened store.
    pub fn build(config: Config, store: Store) -> Result<Self, String> {
        let store = Arc::new(Mutex::new(store));
        let transcriber =
            build_transcriber(&config).map_err(|e| format!("transcriber init: {}", e))?;
        let extractor = build_extractor(&config).map_err(|e| format!("extractor init: {}", e))?;
        let zoom = Arc::new(ZoomClient::from_env().map_err(|e| format!("zoom client: {}", e))?);
        let live = Arc::new(LiveManager::new(
            Arc::clone(&store),
            Arc::clone(&transcriber),
            Arc::clone(&extractor),
        ));
        Ok(Self {
            store,
            config: Arc::new(config),
            live,
            transcriber,
            extractor,
            zoom,
        })
    }
}

/// GET /health — no auth; reports provider readiness and mock mode.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let provider_state = |key: &Option<String>| -> &'static str {
        if state.config.mock_mode {
            "mock"
        } else if key.is_some() {
            "ready"
        } else {
            "unconfigured"
        }
    };
    Json(serde_json::json!({
        "status": "ok",
        "mock_mode": state.config.mock_mode,
        "transcription": provider_state(&state.config.transcribe_api_key),
        "extraction": provider_state(&state.config.extract_api_key),
    }))
}

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/live/start", post(live_routes::start))
        .route("/live/:id/stream", get(live_routes::stream))
        .route("/live/:id/chunk", post(live_routes::chunk))
        .route("/live/:id/stop", post(live_routes::stop))
        .route("/live/:id/status", get(live_routes::status))
        .route("/live/:id/memory-hints", post(live_routes::memory_hints))
        .route("/meetings/upload", post(meeting_routes::upload))
        .route("/meetings/extract", post(meeting_routes::extract))
        .route(
            "/meetings",
            post(meeting_routes::create).get(meeting_routes::list),
        )
        .route(
            "/meetings/:id",
            get(meeting_routes::get).delete(meeting_routes::delete),
        )
        .route(
            "/meetings/:id/transcript",
            patch(meeting_routes::patch_transcript),
        )
        .route(
            "/meetings/:id/extraction",
            patch(meeting_routes::patch_extraction),
        )
        .route("/meetings/:id/insights", get(meeting_routes::insights))
        .route("/meetings/:id/whatchanged", get(meeting_routes::whatchanged))
        .route("/zoom/import", post(zoom_routes::import))
        .route("/issues", get(issue_routes::list))
        .route("/issues/:id/toggle", post(issue_routes::toggle))
        .route(
            "/admin/users/:id/clear-lifetime",
            post(admin_routes::clear_lifetime),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run(state: AppState) -> Result<(), String> {
    let addr = state.config.bind_addr.clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;
    log::info!("listening on {}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::auth::hash_session_token;
    use super::*;
    use crate::db::test_utils::test_store;
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE};
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const TOKEN: &str = "test-token";

    fn test_config() -> Config {
        Config {
            session_secret: SECRET.to_string(),
            transcribe_api_key: None,
            extract_api_key: None,
            mock_mode: true,
            app_url: "http://localhost:8080".to_string(),
            database_path: None,
            admin_email: None,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }

    /// Build a router over an in-memory store with one logged-in user.
    fn test_app(plan: &str) -> (Router, AppState, String) {
        let store = test_store();
        let user_id = store.create_user("router@example.com", plan).unwrap();
        let expires = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        store
            .insert_session(&hash_session_token(SECRET, TOKEN), &user_id, &expires)
            .unwrap();

        let state = AppState::build(test_config(), store).unwrap();
        let router = build_router(state.clone());
        (router, state, user_id)
    }

    fn cookie() -> String {
        format!("session={}", TOKEN)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(COOKIE, cookie())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header(COOKIE, cookie())
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_rejected() {
        let (router, _, _) = test_app("ltd");
        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/meetings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_reports_mock_mode() {
        let (router, _, _) = test_app("ltd");
        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mock_mode"], true);
        assert_eq!(body["transcription"], "mock");
        assert_eq!(body["extraction"], "mock");
    }

    #[tokio::test]
    async fn test_start_conflict_returns_existing_session() {
        let (router, _, _) = test_app("ltd");

        let first = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/live/start",
                serde_json::json!({"title": "Standup"}),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first_body = body_json(first).await;
        assert_eq!(first_body["title"], "Standup");
        let session_id = first_body["session_id"].as_str().unwrap().to_string();

        let second = router
            .oneshot(json_request(
                "POST",
                "/live/start",
                serde_json::json!({"title": "Other"}),
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let second_body = body_json(second).await;
        assert_eq!(second_body["error"], "session_active");
        assert_eq!(second_body["session_id"], session_id.as_str());
    }

    #[tokio::test]
    async fn test_free_extract_cap_returns_429() {
        let (router, state, user_id) = test_app("free");
        {
            let store = state.store.lock().unwrap();
            for month in ["2026-01", "2026-02", "2026-03", "2026-04", "2026-05"] {
                store.increment_usage(&user_id, month).unwrap();
            }
        }

        let response = router
            .oneshot(json_request(
                "POST",
                "/meetings/extract",
                serde_json::json!({"notes": "discuss the roadmap"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["error"], "limit_reached");
        assert_eq!(
            body["message"],
            "Free plan limit reached (5 extracts). Upgrade to continue."
        );

        // Stored usage unchanged
        let total = state.store.lock().unwrap().sum_usage_all_time(&user_id).unwrap();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_extract_succeeds_and_consumes_in_mock_mode() {
        let (router, state, user_id) = test_app("ltd");

        let response = router
            .oneshot(json_request(
                "POST",
                "/meetings/extract",
                serde_json::json!({"notes": "John will fix the bug by Friday"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["action_items"].is_array());
        assert!(body["follow_up_email"].is_string());

        let total = state.store.lock().unwrap().sum_usage_all_time(&user_id).unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_meeting_crud_and_ownership() {
        let (router, state, _) = test_app("ltd");

        let created = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/meetings",
                serde_json::json!({
                    "title": "Planning",
                    "raw_notes": "we planned things",
                    "action_items": {"action_items": [], "follow_up_email": ""}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let meeting_id = body_json(created).await["id"].as_str().unwrap().to_string();

        let fetched = router
            .clone()
            .oneshot(get_request(&format!("/meetings/{}", meeting_id)))
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let body = body_json(fetched).await;
        assert_eq!(body["title"], "Planning");
        assert_eq!(body["raw_notes"], "we planned things");

        // A different user's session sees 404, not 403
        let other_id = {
            let store = state.store.lock().unwrap();
            let other_id = store.create_user("intruder@example.com", "ltd").unwrap();
            let expires = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
            store
                .insert_session(&hash_session_token(SECRET, "other-token"), &other_id, &expires)
                .unwrap();
            other_id
        };
        let foreign = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/meetings/{}", meeting_id))
                    .header(COOKIE, "session=other-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
        let _ = other_id;

        let deleted = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/meetings/{}", meeting_id))
                    .header(COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);

        let gone = router
            .oneshot(get_request(&format!("/meetings/{}", meeting_id)))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chunk_multipart_and_stop_flow() {
        let (router, _, _) = test_app("ltd");

        let started = router
            .clone()
            .oneshot(json_request("POST", "/live/start", serde_json::json!({})))
            .await
            .unwrap();
        let session_id = body_json(started).await["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let boundary = "XRECAPBOUNDARY";
        let multipart_body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"chunk.webm\"\r\nContent-Type: audio/webm\r\n\r\nFAKEAUDIO\r\n--{b}\r\nContent-Disposition: form-data; name=\"timestamp_ms\"\r\n\r\n2500\r\n--{b}--\r\n",
            b = boundary
        );
        let chunk = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/live/{}/chunk", session_id))
                    .header(COOKIE, cookie())
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(multipart_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(chunk.status(), StatusCode::OK);
        let chunk_body = body_json(chunk).await;
        assert_eq!(chunk_body["ok"], true);
        assert_eq!(chunk_body["segment_index"], 0);

        let status = router
            .clone()
            .oneshot(get_request(&format!("/live/{}/status", session_id)))
            .await
            .unwrap();
        let status_body = body_json(status).await;
        assert_eq!(status_body["status"], "active");
        assert_eq!(status_body["segment_count"], 1);

        let stopped = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/live/{}/stop", session_id))
                    .header(COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stopped.status(), StatusCode::OK);
        let stop_body = body_json(stopped).await;
        assert!(stop_body["meeting_id"].is_string());
    }

    #[tokio::test]
    async fn test_stop_with_no_segments() {
        let (router, _, _) = test_app("ltd");

        let started = router
            .clone()
            .oneshot(json_request("POST", "/live/start", serde_json::json!({})))
            .await
            .unwrap();
        let session_id = body_json(started).await["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let stopped = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/live/{}/stop", session_id))
                    .header(COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stopped.status(), StatusCode::OK);
        let body = body_json(stopped).await;
        assert!(body["meeting_id"].is_null());
        assert_eq!(body["message"], "No transcript was captured.");
    }

    #[tokio::test]
    async fn test_admin_clear_lifetime_gated() {
        let store = test_store();
        let admin_id = store.create_user("admin@example.com", "sub_pro").unwrap();
        let target_id = store.create_user("member@example.com", "ltd").unwrap();
        store
            .conn_ref()
            .execute("UPDATE users SET is_lifetime = 1 WHERE id = ?1", [&target_id])
            .unwrap();
        let expires = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        store
            .insert_session(&hash_session_token(SECRET, "admin-token"), &admin_id, &expires)
            .unwrap();
        store
            .insert_session(&hash_session_token(SECRET, "member-token"), &target_id, &expires)
            .unwrap();

        let config = Config {
            admin_email: Some("Admin@Example.com".to_string()),
            ..test_config()
        };
        let state = AppState::build(config, store).unwrap();
        let router = build_router(state.clone());

        let uri = format!("/admin/users/{}/clear-lifetime", target_id);
        let as_member = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(&uri)
                    .header(COOKIE, "session=member-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(as_member.status(), StatusCode::FORBIDDEN);

        let as_admin = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(&uri)
                    .header(COOKIE, "session=admin-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(as_admin.status(), StatusCode::OK);

        let user = state
            .store
            .lock()
            .unwrap()
            .find_user_by_id(&target_id)
            .unwrap()
            .unwrap();
        assert!(!user.is_lifetime);
    }

    #[tokio::test]
    async fn test_whatchanged_first_meeting() {
        let (router, state, user_id) = test_app("ltd");
        let meeting_id = state
            .store
            .lock()
            .unwrap()
            .create_meeting(&user_id, Some("Solo"), "first ever meeting", "{}")
            .unwrap();

        let response = router
            .oneshot(get_request(&format!("/meetings/{}/whatchanged", meeting_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["has_prior"], false);
    }

    #[tokio::test]
    async fn test_insights_create_tracked_issues() {
        let (router, state, user_id) = test_app("ltd");
        {
            let store = state.store.lock().unwrap();
            let record = crate::extraction::ExtractionRecord {
                action_items: vec![crate::extraction::ActionItem {
                    task: "Fix authentication bug".to_string(),
                    owner: "John".to_string(),
                    deadline: "Friday".to_string(),
                }],
                ..Default::default()
            };
            let m1 = store
                .create_meeting(
                    &user_id,
                    Some("Standup 1"),
                    "John: fix the authentication bug by Friday.",
                    &record.to_stored(),
                )
                .unwrap();
            store
                .conn_ref()
                .execute(
                    "UPDATE meetings SET created_at = '2026-01-01T00:00:00Z' WHERE id = ?1",
                    [&m1],
                )
                .unwrap();
        }
        let m2 = state
            .store
            .lock()
            .unwrap()
            .create_meeting(
                &user_id,
                Some("Standup 2"),
                "John: the authentication bug is still open on staging.",
                "{}",
            )
            .unwrap();

        let response = router
            .clone()
            .oneshot(get_request(&format!("/meetings/{}/insights", m2)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let types: Vec<&str> = body["insights"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type"].as_str().unwrap())
            .collect();
        assert!(types.contains(&"unresolved_items"));

        let issues = router
            .oneshot(get_request("/issues"))
            .await
            .unwrap();
        let issues_body = body_json(issues).await;
        let texts: Vec<&str> = issues_body
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["issueText"].as_str().unwrap())
            .collect();
        assert!(texts.contains(&"Fix authentication bug"));
    }
}
