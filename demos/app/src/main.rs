//! Demo web application deployed onto each fleet instance.
//!
//! Answers every GET with a line identifying which instance served it,
//! so responses through the load balancer show the round-robin spread.

use axum::routing::get;
use axum::Router;

async fn respond() -> String {
    let number = std::env::var("INSTANCE_NUMBER").unwrap_or_else(|_| "?".to_string());
    format!("Instance number {number} is responding now!")
}

#[tokio::main]
async fn main() {
    let app = Router::new()
        .route("/", get(respond))
        .route("/*path", get(respond));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000")
        .await
        .expect("failed to bind 0.0.0.0:8000");
    axum::serve(listener, app).await.expect("server error");
}
