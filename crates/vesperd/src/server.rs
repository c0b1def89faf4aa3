//! HTTP serving glue shared by all services.

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Wrap a service router with the standard layers and serve it on its
/// own local port. The front end runs in a browser, so every service
/// answers cross-origin requests.
pub async fn serve(router: Router, bind_addr: &str, port: u16, service: &str) -> Result<()> {
    let app = router
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", bind_addr, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("{} listening on http://{}", service, addr);

    axum::serve(listener, app).await?;
    Ok(())
}
