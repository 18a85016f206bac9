use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};

use crate::resolution::PrometheusObserver;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn create_app(metrics: Arc<PrometheusObserver>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusObserver>>) -> Response {
    match metrics.render() {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
            response
        }
        Err(e) => {
            tracing::error!("Failed to render metrics. {e}");
            let mut response = Response::new(Body::from(e.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Serves `/metrics` in the background. Returns the bound address.
pub async fn run_metrics_server(addr: SocketAddr, metrics: Arc<PrometheusObserver>) -> Result<SocketAddr, anyhow::Error> {
    let app = create_app(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!("Metrics server stopped. {e}");
        }
    });
    Ok(addr)
}
