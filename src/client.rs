//! HTTP client behind `fling upload`.

use crate::models::stored_object::StoredObject;
use reqwest::{
    StatusCode, Url, header,
    multipart::{Form, Part},
};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("address `{0}` must be an http(s) URL")]
    InvalidAddr(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("server responded {status}: {message}")]
    Server { status: StatusCode, message: String },
}

/// Uploads files to a fling server.
#[derive(Debug, Clone)]
pub struct Client {
    base: Url,
    token: String,
    http: reqwest::Client,
}

impl Client {
    /// `addr` is the server's base URL. A missing trailing slash is added so
    /// share URLs can be built by appending the object name.
    pub fn new(addr: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        let mut base = Url::parse(addr).map_err(|_| ClientError::InvalidAddr(addr.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidAddr(addr.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fling/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base,
            token: token.into(),
            http,
        })
    }

    /// URL at which `object` can be downloaded.
    pub fn url(&self, object: &StoredObject) -> String {
        format!("{}{}", self.base, object.name)
    }

    /// Upload `content` as `filename`, kept for `duration` (e.g. `1h30m`).
    pub async fn upload(
        &self,
        content: Vec<u8>,
        filename: &str,
        duration: &str,
    ) -> Result<StoredObject, ClientError> {
        let form = Form::new()
            .part("file", Part::bytes(content).file_name(filename.to_string()))
            .text("duration", duration.to_string());

        let resp = self
            .http
            .post(self.base.clone())
            .header(header::AUTHORIZATION, format!("Token {}", self.token))
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Server {
                status,
                message: server_message(&body),
            });
        }
        Ok(resp.json::<StoredObject>().await?)
    }
}

/// Pull `error` out of a JSON error body, falling back to the raw text.
fn server_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
