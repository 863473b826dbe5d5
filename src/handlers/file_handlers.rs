//! HTTP handlers for uploading and serving files.
//! Uploads are authorised against the shared token and handed to
//! `StorageService::put`; downloads stream the blob from disk.

use crate::{
    config::parse_duration,
    errors::AppError,
    models::stored_object::StoredObject,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use chrono::Duration;
use futures::{future, stream};
use std::{ffi::OsStr, io, path::Path as FsPath};
use subtle::ConstantTimeEq;
use tokio_util::io::ReaderStream;
use tracing::info;

const TOKEN_SCHEME: &str = "Token ";

/// `POST /` — multipart upload with a `file` field and an optional `duration`.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<StoredObject>, AppError> {
    if !authorized(&headers, &state.upload_token) {
        return Err(AppError::forbidden());
    }

    let mut upload: Option<(String, Bytes)> = None;
    let mut duration: Option<String> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                upload = Some((filename, data));
            }
            Some("duration") => {
                duration = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or_else(|| AppError::bad_request("missing `file` field"))?;
    let lifetime = duration
        .as_deref()
        .and_then(parse_duration)
        .filter(|d| !d.is_zero())
        .unwrap_or(state.default_lifetime);
    let lifetime = Duration::from_std(lifetime)
        .map_err(|_| AppError::bad_request("duration out of range"))?;

    let extension = extension_of(&filename);
    let size = data.len();
    let content = stream::once(future::ready(Ok::<_, io::Error>(data)));
    let object = state.storage.put(content, lifetime, &extension).await?;

    info!(
        name = %object.name,
        size,
        expires_at = %object.expires_at,
        "accepted upload"
    );
    Ok(Json(object))
}

/// `GET /{name}` — stream a stored file.
pub async fn get_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let (object, file) = state.storage.open(&name).await?;
    let length = file
        .metadata()
        .await
        .map_err(|err| AppError::internal(format!("stat failed: {err}")))?
        .len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &object, length);
    Ok(response)
}

/// Accepts `Authorization: Token <secret>` or a bare secret. An empty
/// configured secret leaves uploads open.
fn authorized(headers: &HeaderMap, expected: &[u8]) -> bool {
    if expected.is_empty() {
        return true;
    }
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let provided = provided.strip_prefix(TOKEN_SCHEME).unwrap_or(provided);
    provided.as_bytes().ct_eq(expected).into()
}

/// `.txt` for `notes.txt`, empty when the filename has no extension.
fn extension_of(filename: &str) -> String {
    FsPath::new(filename)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn set_file_headers(headers: &mut HeaderMap, object: &StoredObject, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&object.name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let expires = object
        .expires_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&expires) {
        headers.insert(header::EXPIRES, value);
    }
}

fn content_type_for(name: &str) -> &'static str {
    let ext = FsPath::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" | "rs" | "go" | "py" | "sh" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routes::routes::routes,
        services::{clock::ManualClock, storage_service::tests::test_service},
    };
    use axum::{Router, body::to_bytes, http::Request};
    use std::{sync::Arc, time::Duration as StdDuration};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "fling-test-boundary";

    async fn test_app() -> (TempDir, Router, Arc<ManualClock>) {
        let (dir, storage, clock) = test_service().await;
        let state = AppState::new(storage, "secret", StdDuration::from_secs(3600));
        (dir, routes(1 << 20).with_state(state), clock)
    }

    fn multipart_body(filename: &str, content: &str, duration: Option<&str>) -> String {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
        );
        if let Some(duration) = duration {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"duration\"\r\n\r\n{duration}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload_request(token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::post("/").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn upload(app: &Router, body: String) -> StoredObject {
        let resp = app
            .clone()
            .oneshot(upload_request(Some("Token secret"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get(app: &Router, name: &str) -> Response {
        app.clone()
            .oneshot(Request::get(format!("/{name}")).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (_dir, app, _clock) = test_app().await;

        let object = upload(&app, multipart_body("note.txt", "hello", Some("2h"))).await;
        assert!(object.name.ends_with(".txt"));
        assert_eq!(object.expires_at - object.created_at, Duration::hours(2));

        let resp = get(&app, &object.name).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "5");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_upload_requires_token() {
        let (_dir, app, _clock) = test_app().await;

        for token in [None, Some("Token wrong"), Some("secre")] {
            let resp = app
                .clone()
                .oneshot(upload_request(token, multipart_body("a.txt", "x", None)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{token:?}");
        }

        let resp = app
            .clone()
            .oneshot(upload_request(Some("secret"), multipart_body("a.txt", "x", None)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unusable_duration_falls_back_to_default() {
        let (_dir, app, _clock) = test_app().await;

        for duration in [None, Some("soon"), Some("0s")] {
            let object = upload(&app, multipart_body("a.bin", "x", duration)).await;
            assert_eq!(object.expires_at - object.created_at, Duration::hours(1));
        }
    }

    #[tokio::test]
    async fn test_upload_with_url_unsafe_extension_is_rejected() {
        let (_dir, app, _clock) = test_app().await;

        for filename in ["a.t#x", "a.%41", "a.t?x", "a.t x"] {
            let resp = app
                .clone()
                .oneshot(upload_request(
                    Some("Token secret"),
                    multipart_body(filename, "x", None),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{filename}");
        }

        let object = upload(&app, multipart_body("a.tar-gz_1", "x", None)).await;
        assert_eq!(get(&app, &object.name).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let (_dir, app, _clock) = test_app().await;
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"duration\"\r\n\r\n1h\r\n--{BOUNDARY}--\r\n"
        );

        let resp = app
            .clone()
            .oneshot(upload_request(Some("Token secret"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_unknown_and_expired() {
        let (_dir, app, clock) = test_app().await;

        assert_eq!(get(&app, "zzzzz").await.status(), StatusCode::NOT_FOUND);

        let object = upload(&app, multipart_body("a", "x", Some("1m"))).await;
        assert_eq!(object.name.len(), 5);
        assert_eq!(get(&app, &object.name).await.status(), StatusCode::OK);

        clock.advance(Duration::minutes(2));
        assert_eq!(get(&app, &object.name).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("notes.txt"), ".txt");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("../../etc/passwd"), "");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("-"), "");
    }

    #[test]
    fn test_open_uploads_when_token_empty() {
        assert!(authorized(&HeaderMap::new(), b""));
        assert!(!authorized(&HeaderMap::new(), b"secret"));
    }
}
