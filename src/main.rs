// src/main.rs

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod clients;
mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod services;

use crate::clients::messaging::{ChannelConfig, ChannelSession};
use crate::config::{AppState, Settings};
use crate::docs::ApiDoc;
use crate::middleware::auth::auth_guard;

fn app(app_state: AppState) -> Router {
    let guard = || axum_middleware::from_fn_with_state(app_state.clone(), auth_guard);

    // Login is public, registering staff needs an owner token
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth::register).layer(guard()))
        .route("/login", post(handlers::auth::login));

    let user_routes = Router::new()
        .route("/me", get(handlers::auth::get_me))
        .layer(guard());

    let lead_routes = Router::new()
        .route("/", post(handlers::leads::create_lead).get(handlers::leads::list_leads))
        .route("/{id}", get(handlers::leads::get_lead));

    Router::new()
        .route("/", get(|| async { "🤖 Smart management server is running." }))
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .route("/api/staff", get(handlers::auth::list_staff).layer(guard()))
        .nest("/api/leads", lead_routes)
        .route("/api/portal/login", get(handlers::portal::run_portal_login))
        // Paths the sheet front-end already calls
        .route("/send-receipt", post(handlers::receipts::send_receipt))
        .route("/update-sheet-record", post(handlers::ledger::update_sheet_record))
        .route("/update-receipt", post(handlers::ledger::update_receipt))
        .route("/get-all-sheet-data", get(handlers::ledger::get_all_sheet_data))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Configuration problems stop the process before it serves anything.
    let settings = Settings::from_env()?;

    let channel = ChannelSession::new(ChannelConfig {
        gateway_url: settings.gateway_url.clone(),
        reconnect_delay: settings.reconnect_delay,
    });

    let app_state = AppState::new(&settings, channel.clone()).await?;

    sqlx::migrate!().run(&app_state.db_pool).await?;
    tracing::info!("✅ Database migrations applied.");

    if let Some((email, password)) = &settings.bootstrap_owner {
        app_state.auth_service.ensure_owner(email, password).await?;
    }

    channel.connect().await;

    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    tracing::info!("🚀 Server listening on {}", listener.local_addr()?);

    let shutdown_channel = Arc::clone(&channel);
    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
            shutdown_channel.shutdown().await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::sheets::memory::MemorySheet,
        config::testing,
        services::{
            portal::scripted::{Script, ScriptedLauncher, ENTRY, TARGET},
            receipt::tests::RecordingChannel,
        },
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn ledger() -> Arc<MemorySheet> {
        let mut row = vec![String::new(); 31];
        row[1] = "Ramesh".into();
        row[5] = "1042".into();
        row[17] = "9876543210".into();
        row[19] = "250".into();

        let sheet = MemorySheet::default();
        {
            let mut rows = sheet.rows.lock().unwrap();
            rows.resize(3, vec!["header".to_string()]);
            rows.push(row);
        }
        Arc::new(sheet)
    }

    fn router_with(channel: Arc<RecordingChannel>, script: Script) -> (Router, Arc<MemorySheet>) {
        let sheet = ledger();
        let state = testing::state(Arc::clone(&sheet), channel, ScriptedLauncher::new(script));
        (app(state), sheet)
    }

    fn router() -> Router {
        router_with(RecordingChannel::ready(), Script::default()).0
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
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

    #[tokio::test]
    async fn health_check() {
        let response = router().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn receipt_is_sent_for_ledger_row() {
        let channel = RecordingChannel::ready();
        let (router, _) = router_with(Arc::clone(&channel), Script::default());

        // m_id 1 -> record 3 -> sheet row 4
        let (status, body) = call(router, post_json("/send-receipt", json!({ "m_id": "1" }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Receipt sent to 9876543210");
        assert!(channel.sent.lock().unwrap()[0].1.text.contains("₹250.00"));
    }

    #[tokio::test]
    async fn receipt_without_session_is_503() {
        let (router, _) = router_with(Arc::new(RecordingChannel::default()), Script::default());

        let (status, body) = call(router, post_json("/send-receipt", json!({ "m_id": 1 }))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn receipt_for_empty_row_is_404() {
        let (status, body) = call(router(), post_json("/send-receipt", json!({ "m_id": 40 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("sheet row 43"));
    }

    #[tokio::test]
    async fn ledger_update_and_receipt_round() {
        let (router, sheet) = router_with(RecordingChannel::ready(), Script::default());

        let (status, body) = call(
            router.clone(),
            post_json("/update-sheet-record", json!({ "milkatId": "1042", "rowData": ["9", "Ramesh P", "", "", "", "1042"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Record for Milkat ID 1042 updated.");
        assert_eq!(sheet.row(3)[1], "Ramesh P");

        let (status, body) = call(
            router.clone(),
            post_json("/update-receipt", json!({ "milkatId": 1042, "receiptNumber": "R-7" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Receipt and date updated at row 4.");
        assert_eq!(sheet.row(3)[31], "R-7");

        let (status, _) = call(
            router,
            post_json("/update-receipt", json!({ "milkatId": "1", "receiptNumber": "R-8" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_fields_are_400() {
        let (status, body) = call(router(), post_json("/update-sheet-record", json!({ "milkatId": "1042" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing milkatId or rowData in request.");
    }

    #[tokio::test]
    async fn sheet_data_skips_placeholder_row() {
        let (status, body) = call(router(), get("/get-all-sheet-data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
        assert_eq!(body["message"], "Successfully fetched all data from AC MAST.");
    }

    #[tokio::test(start_paused = true)]
    async fn portal_login_reports_listing_page() {
        let (status, body) = call(router(), get("/api/portal/login")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], TARGET);
    }

    #[tokio::test(start_paused = true)]
    async fn portal_failure_is_502_with_last_url() {
        let launcher = ScriptedLauncher::new(Script { dropdowns_ready_after: None, ..Script::default() });
        let closes = Arc::clone(&launcher.closes);
        let state = testing::state(ledger(), RecordingChannel::ready(), launcher);

        let (status, body) = call(app(state), get("/api/portal/login")).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert_eq!(body["url"], ENTRY);
        assert!(body["message"].as_str().unwrap().contains("dropdowns never loaded"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_requires_a_token() {
        let (status, _) = call(
            router(),
            post_json("/api/auth/register", json!({ "name": "A", "email": "a@b.in", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forged_tokens_are_rejected() {
        let request = Request::get("/api/users/me")
            .header(header::AUTHORIZATION, "Bearer not-a-real-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(router(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    fn lead_form() -> Value {
        json!({
            "customerName": "Mahesh Chaudhari",
            "mobileNumber": "9876543210",
            "whatsappNumber": "9876543210",
            "village": "Meghraj",
            "district": "Aravalli",
            "taluko": "Meghraj",
            "houseCount": 10,
            "pricePerHouse": "12.5",
            "inquiryFor": "Tax software",
            "designation": "TCM",
            "referenceSource": "Call",
            "incomingCallDate": "2025-06-01",
            "reminderDate": "2025-06-08"
        })
    }

    #[tokio::test]
    async fn oversized_bill_is_400_before_storage() {
        let mut form = lead_form();
        form["houseCount"] = json!(2);
        form["pricePerHouse"] = json!("79228162514264337593543950335");

        let (status, body) = call(router(), post_json("/api/leads", form)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "House count times price per house is too large.");
    }

    #[tokio::test]
    async fn invalid_lead_is_rejected_before_storage() {
        let mut form = lead_form();
        form["customerName"] = json!(" ");

        let (status, body) = call(router(), post_json("/api/leads", form)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].is_object());
    }
}
