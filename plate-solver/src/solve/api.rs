//! HTTP transport for the astrometry.net API
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::error::{Result, SolveError};
use super::types::{AuthResponse, SubmissionResponse, SubmissionStatusResponse};

pub const DEFAULT_API_BASE: &str = "http://nova.astrometry.net/api/";
const USER_AGENT: &str = "plate-solver/0.1";

/// Requests the client needs from the remote service
///
/// `request_json` arguments are the already-serialized JSON documents the
/// service expects in its `request-json` form field.
#[async_trait]
pub trait SolveApi: Send + Sync {
    async fn login(&self, request_json: String) -> Result<AuthResponse>;

    async fn upload(&self, request_json: String, image: Vec<u8>) -> Result<SubmissionResponse>;

    async fn submission_status(&self, subid: u64) -> Result<SubmissionStatusResponse>;
}

/// `SolveApi` backed by a shared reqwest client
pub struct HttpSolveApi {
    client: Client,
    api_base: String,
}

impl HttpSolveApi {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SolveError::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: normalize_base(api_base),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

#[async_trait]
impl SolveApi for HttpSolveApi {
    async fn login(&self, request_json: String) -> Result<AuthResponse> {
        let response = self
            .client
            .post(self.url("login"))
            .form(&[("request-json", request_json)])
            .send()
            .await?;

        read_json(response, "login").await
    }

    async fn upload(&self, request_json: String, image: Vec<u8>) -> Result<SubmissionResponse> {
        let file_name = format!("SolveMe-{}", chrono::Utc::now().timestamp());
        let file = Part::bytes(image)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("request-json", request_json)
            .part("file", file);

        let response = self
            .client
            .post(self.url("upload"))
            .multipart(form)
            .send()
            .await?;

        read_json(response, "upload").await
    }

    async fn submission_status(&self, subid: u64) -> Result<SubmissionStatusResponse> {
        let response = self
            .client
            .get(self.url(&format!("submissions/{}", subid)))
            .send()
            .await?;

        read_json(response, &format!("submission {}", subid)).await
    }
}

/// Check the status code, then decode the body as JSON
async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    if !response.status().is_success() {
        return Err(SolveError::NetworkFailure(format!(
            "HTTP error {} for {}",
            response.status(),
            what
        )));
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| SolveError::DecodeFailure(format!("Failed to parse {} response: {}", what, e)))
}

/// Ensure a base URL ends with exactly one slash so paths can be appended
pub fn normalize_base(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}
