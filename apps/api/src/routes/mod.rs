pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::dm::handlers as dm;
use crate::outreach::handlers as outreach;
use crate::runs::handlers as runs;
use crate::outreach::smtp::MAX_ATTACHMENT_BYTES;
use crate::state::AppState;

/// Room for a maximum-size résumé plus multipart framing.
const MAX_UPLOAD_BYTES: usize = MAX_ATTACHMENT_BYTES as usize + 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Users
        .route("/api/v1/users", post(outreach::handle_create_user))
        .route("/api/v1/users/:id", get(outreach::handle_get_user))
        .route(
            "/api/v1/users/:id/resume",
            post(outreach::handle_upload_resume).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/users/:id/contacts",
            get(outreach::handle_list_contacts),
        )
        .route(
            "/api/v1/users/:id/campaigns",
            get(outreach::handle_list_campaigns),
        )
        // Campaigns
        .route(
            "/api/v1/campaigns/email",
            post(outreach::handle_start_email_campaign),
        )
        .route("/api/v1/campaigns/dm", post(dm::handle_start_dm_campaign))
        // Runs
        .route("/api/v1/runs/:id/events", get(runs::handle_run_events))
        .route("/api/v1/runs/:id/cancel", post(runs::handle_cancel_run))
        .route(
            "/api/v1/runs/:id/confirm-login",
            post(runs::handle_confirm_login),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::state::test_state;

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn app_with_user() -> (Router, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()).await);
        let (status, user) = call(&app, post_json("/api/v1/users", json!({"username": "sam"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = user["id"].as_str().unwrap().to_string();
        (app, id, dir)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let runs = state.runs.clone();
        let db = state.db.clone();
        let app = build_router(state);

        let _handle = runs.start();
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "outreach");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], true);
        assert_eq!(body["active_runs"], 1);

        db.close().await;
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"], false);
    }

    #[tokio::test]
    async fn test_create_and_fetch_user() {
        let (app, id, _dir) = app_with_user().await;

        let (status, body) = call(&app, get(&format!("/api/v1/users/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "sam");
        assert_eq!(body["resume_path"], Value::Null);

        let (status, body) = call(&app, post_json("/api/v1/users", json!({"username": "sam"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");

        let (status, body) = call(&app, get(&format!("/api/v1/users/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_resume_upload_requires_pdf() {
        let (app, id, _dir) = app_with_user().await;
        let boundary = "XBOUNDARY";
        let upload = |content: &str| {
            let body = format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"resume\"; filename=\"cv.pdf\"\r\n\
                 Content-Type: application/pdf\r\n\r\n{content}\r\n--{boundary}--\r\n"
            );
            Request::post(format!("/api/v1/users/{id}/resume"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap()
        };

        let (status, _) = call(&app, upload("plain text")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, upload("%PDF-1.4 minimal")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["resume_path"].as_str().unwrap().ends_with(&format!("{id}.pdf")));
    }

    #[tokio::test]
    async fn test_history_listings_start_empty() {
        let (app, id, _dir) = app_with_user().await;

        let (status, body) = call(&app, get(&format!("/api/v1/users/{id}/contacts?channel=dm"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = call(&app, get(&format!("/api/v1/users/{id}/campaigns"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_email_campaign_validation() {
        let (app, id, _dir) = app_with_user().await;
        let request = |count: u32, sender: &str| {
            post_json(
                "/api/v1/campaigns/email",
                json!({
                    "user_id": id,
                    "location": "Atlanta",
                    "industry": "Clean Tech",
                    "count": count,
                    "sender_email": sender,
                    "sender_password": "app-password"
                }),
            )
        };

        let (status, body) = call(&app, request(0, "sam@gmail.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("between 1 and 50"));

        let (status, _) = call(&app, request(51, "sam@gmail.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, request(3, "sam@example.org")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Unsupported email provider"));
    }

    #[tokio::test]
    async fn test_dm_campaign_validation() {
        let (app, id, _dir) = app_with_user().await;
        let request = |city: &str| {
            post_json(
                "/api/v1/campaigns/dm",
                json!({"user_id": id, "city": city, "job_field": "solar", "count": 2}),
            )
        };

        let (status, body) = call(&app, request("Dallas")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("City, State"));

        // A valid city still needs a résumé on file
        let (status, body) = call(&app, request("Dallas, Texas")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("résumé"));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()).await);
        let run = Uuid::new_v4();

        let (status, _) = call(&app, get(&format!("/api/v1/runs/{run}/events"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, post_json(&format!("/api/v1/runs/{run}/cancel"), json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(
            &app,
            post_json(&format!("/api/v1/runs/{run}/confirm-login"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_stream_ends_after_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let runs = state.runs.clone();
        let app = build_router(state);

        let handle = runs.start();
        handle.progress.in_progress("Searching...");
        handle
            .progress
            .finish(crate::runs::EventStatus::Success, "Campaign complete: 0 sent", Some(0));

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/runs/{}/events", handle.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains(r#""status":"in-progress""#));
        assert!(text.contains(r#""complete":true"#));
        assert_eq!(runs.len(), 0);

        let (status, _) = call(&app, post_json(&format!("/api/v1/runs/{}/cancel", handle.id), json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disconnected_stream_can_be_resumed() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let runs = state.runs.clone();
        let app = build_router(state);

        let handle = runs.start();
        let events = format!("/api/v1/runs/{}/events", handle.id);
        handle.progress.in_progress("Searching...");

        // Read one event, then hang up mid-run
        let response = app.clone().oneshot(get(&events)).await.unwrap();
        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("Searching..."));
        drop(body);

        assert_eq!(runs.len(), 1);
        let (status, _) = call(&app, post_json(&format!("/api/v1/runs/{}/cancel", handle.id), json!({}))).await;
        assert_eq!(status, StatusCode::OK);

        handle
            .progress
            .finish(crate::runs::EventStatus::Info, "Campaign cancelled: 0 sent", Some(0));
        let response = app.clone().oneshot(get(&events)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("Campaign cancelled"));
        assert!(!text.contains("Searching..."));
        assert_eq!(runs.len(), 0);
    }
}
