//! Liveness and readiness checks.
//!
//! - GET /healthz  -> always `{"status":"ok"}`
//! - GET /readyz   -> checks the catalog and the upload directory

use crate::{services::storage_service::StorageService, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const SCRATCH_BYTES: &[u8] = b"readyz";

/// `GET /healthz`. Performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// `GET /readyz`
///
/// 200 when the catalog answers `SELECT 1` and a scratch file can be written,
/// read back and removed in the upload directory; 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_catalog(&state.storage).await);
    checks.insert("disk", check_disk(&state.storage.base_path).await);

    let ready = checks.values().all(|check| check.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn check_catalog(storage: &StorageService) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*storage.db)
        .await
    {
        Ok(1) => CheckStatus::passed(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {v}")),
        Err(e) => CheckStatus::failed(format!("error: {e}")),
    }
}

/// The leading dot keeps the scratch file outside the namespace of generated names.
async fn check_disk(upload_dir: &Path) -> CheckStatus {
    let scratch = upload_dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&scratch, SCRATCH_BYTES).await {
        return CheckStatus::failed(format!("could not write scratch file: {e}"));
    }

    let read_back = fs::read(&scratch).await;
    let removed = fs::remove_file(&scratch).await;
    match (read_back, removed) {
        (Err(e), _) => CheckStatus::failed(format!("could not read scratch file: {e}")),
        (Ok(bytes), _) if bytes != SCRATCH_BYTES => CheckStatus::failed("scratch file content mismatch"),
        (Ok(_), Err(e)) => CheckStatus::failed(format!("could not remove scratch file: {e}")),
        (Ok(_), Ok(())) => CheckStatus::passed(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
