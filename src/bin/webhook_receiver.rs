//! Minimal receiver for completion webhooks, for local development.
//!
//! Usage:
//!   WEBHOOK_BIND_ADDR=0.0.0.0:5001 cargo run --bin webhook_receiver
//!
//! Point the server's WEBHOOK_URL at http://localhost:5001/webhook.

use axum::routing::post;
use axum::{Json, Router};
use product_image_batch::services::notifier::CompletionEvent;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5001";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();
    let bind_addr =
        std::env::var("WEBHOOK_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let app = Router::new().route("/webhook", post(receive));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Webhook receiver listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

async fn receive(Json(payload): Json<Value>) -> Json<Value> {
    match serde_json::from_value::<CompletionEvent>(payload.clone()) {
        Ok(event) => tracing::info!(job_id = %event.job_id, status = %event.status, "Webhook received"),
        Err(_) => tracing::info!(payload = %payload, "Webhook received with unrecognised payload"),
    }
    Json(json!({ "status": "Received" }))
}
