//! Defines the HTTP surface of the file-sharing service.
//!
//! - `POST /`        — multipart upload (`file`, optional `duration`)
//! - `GET  /{name}`  — download a stored file
//! - `GET  /healthz` — liveness
//! - `GET  /readyz`  — readiness
//!
//! Generated names are never `healthz` or `readyz`, so the static routes
//! cannot shadow a stored file.

use crate::{
    handlers::{
        file_handlers::{get_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Request bodies above `max_upload_size` bytes are
/// rejected with 413.
pub fn routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", post(upload_file))
        .route("/{name}", get(get_file))
        .layer(DefaultBodyLimit::max(max_upload_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::tests::test_service;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_method_and_size_limits() {
        let (_dir, storage, _clock) = test_service().await;
        let app = routes(64).with_state(AppState::new(storage, "", Duration::from_secs(60)));

        let resp = app
            .clone()
            .oneshot(Request::delete("/abcde").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let resp = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = format!(
            "--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\r\n{}\r\n--b--\r\n",
            "x".repeat(256)
        );
        let resp = app
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=b")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
