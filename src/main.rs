use axum::{routing::get, Json, Router};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use admission_gate::http::{control_router, with_admission, AppState};
use admission_gate::limiter::RateLimiterChain;
use admission_gate::{init_logging, AdmissionConfig, AdmissionController};

/// Placeholder business surface; the real CRM handlers mount here.
fn business_router() -> Router {
    let listing = || async { Json(serde_json::json!({ "success": true, "data": [] })) };
    Router::new()
        .route("/api/blogs", get(listing).post(listing))
        .route("/api/videos", get(listing).post(listing))
        .route("/api/faqs", get(listing).post(listing))
        .route("/api/trainers", get(listing).post(listing))
        .route("/api/leads", get(listing).post(listing))
        .route("/api/uploads", get(listing).post(listing))
        .route("/api/auth/login", axum::routing::post(listing))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Admission layer starting up");

    let config = AdmissionConfig::default();
    let controller = Arc::new(AdmissionController::new(config)?);

    // Detached on purpose; the sweeper runs for the process lifetime
    let _sweeper =
        RateLimiterChain::spawn_sweeper(Arc::clone(controller.chain()), Duration::from_secs(60));

    let state = AppState {
        controller: Arc::clone(&controller),
    };

    let app = with_admission(business_router(), state.clone()).merge(control_router(state));

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
