use crate::exporter::{AppState, MetricsSource};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error};

/// Render the accumulated state; never triggers collection.
pub async fn metrics(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(encoder.format_type())
            .unwrap_or_else(|_| HeaderValue::from_static("text/plain; charset=utf-8")),
    );

    match &state.source {
        MetricsSource::Collectors {
            collectors,
            registry,
        } => {
            let families = collectors.gather(registry);

            let mut body = String::new();
            match encoder.encode_utf8(&families, &mut body) {
                Ok(()) => {
                    debug!(families = families.len(), "encoded metrics");
                    (StatusCode::OK, headers, body)
                }
                Err(e) => {
                    error!(error = %e, "failed to encode metrics");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        headers,
                        format!("Error encoding metrics: {e}"),
                    )
                }
            }
        }
        MetricsSource::File(path) => match tokio::fs::read_to_string(path).await {
            Ok(body) => (StatusCode::OK, headers, body),
            Err(e) => {
                error!(file = %path.display(), error = %e, "failed to read metrics file");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    headers,
                    format!("Error reading metrics file: {e}"),
                )
            }
        },
    }
}
