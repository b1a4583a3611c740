//! Wire payloads and client state types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of the `request-json` field sent to the login endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub apikey: &'a str,
}

/// Login reply. The service answers `{"status": "error", "errormessage": ...}`
/// for a bad key, which leaves `session` empty.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errormessage: Option<String>,
    pub session: Option<String>,
}

/// Body of the `request-json` multipart field sent with an upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest<'a> {
    pub publicly_visible: &'a str,
    pub allow_modifications: &'a str,
    pub session: &'a str,
    pub allow_commercial_use: &'a str,
}

/// Upload reply
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionResponse {
    pub subid: u64,
}

/// Submission status reply
///
/// Each calibration entry is `[job_id, calibration_id]`; only the job id
/// is used to build the annotated image URL.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionStatusResponse {
    pub job_calibrations: Vec<Vec<u64>>,
}

impl SubmissionStatusResponse {
    /// Job id of the first calibration, if the service has published one
    pub fn first_job_id(&self) -> Option<u64> {
        self.job_calibrations.first().and_then(|c| c.first()).copied()
    }
}

/// Lifecycle of the current submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionState {
    #[default]
    NotStarted,
    Processing,
    Done,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::NotStarted => "Not Started",
            SubmissionState::Processing => "Processing",
            SubmissionState::Done => "Done",
        };
        f.write_str(s)
    }
}

/// User-visible credential problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    NoApiKey,
    Unauthorized,
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorState::NoApiKey => "No API Key",
            ErrorState::Unauthorized => "Invalid API Key",
        };
        f.write_str(s)
    }
}

/// Everything an observer needs to render the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveSnapshot {
    pub submission_state: SubmissionState,
    pub error_state: Option<ErrorState>,
    pub submission_id: Option<u64>,
    /// Annotated image URL, set once the submission is done
    pub result_url: Option<String>,
    pub polling: bool,
}
