//! Submission client: authenticate, upload, poll until solved
//!
//! All observable state lives in a single `SolveSnapshot` behind a
//! `watch` channel. Mutations go through `send_modify`, so observers
//! always see a consistent snapshot.
//!
//! Polling runs as one background task per submission. The task holds a
//! weak reference back to the client and its handle is owned by a guard
//! that aborts it on drop, so a new upload, `shutdown`, or dropping the
//! client all end it.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use reqwest::Url;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use super::api::SolveApi;
use super::error::{Result, SolveError};
use super::store::{API_KEY, KeyValueStore, LAST_SUBMISSION, SESSION_KEY};
use super::types::{
    ErrorState, LoginRequest, SolveSnapshot, SubmissionState, UploadRequest,
};

pub const DEFAULT_ANNOTATED_BASE: &str = "http://nova.astrometry.net/annotated_display/";
pub const DEFAULT_STATUS_BASE: &str = "http://nova.astrometry.net/status/";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Shortest interval the poller accepts; `tokio::time::interval` rejects zero
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Flags sent with every upload
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub publicly_visible: String,
    pub allow_modifications: String,
    pub allow_commercial_use: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            publicly_visible: "y".to_string(),
            allow_modifications: "d".to_string(),
            allow_commercial_use: "d".to_string(),
        }
    }
}

/// Client settings that do not involve the transport
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub annotated_base: String,
    pub status_base: String,
    pub poll_interval: Duration,
    pub upload: UploadOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            annotated_base: DEFAULT_ANNOTATED_BASE.to_string(),
            status_base: DEFAULT_STATUS_BASE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            upload: UploadOptions::default(),
        }
    }
}

/// Aborts the polling task when dropped
struct PollGuard {
    submission_id: u64,
    handle: JoinHandle<()>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Inner {
    api: Arc<dyn SolveApi>,
    store: Arc<dyn KeyValueStore>,
    options: ClientOptions,
    api_key: RwLock<Option<String>>,
    state: watch::Sender<SolveSnapshot>,
    poller: Mutex<Option<PollGuard>>,
}

/// Handle to the plate-solving client. Clones share the same state.
#[derive(Clone)]
pub struct SolveClient {
    inner: Arc<Inner>,
}

impl SolveClient {
    /// Create a client, picking up a persisted API key if there is one
    pub async fn new(
        api: Arc<dyn SolveApi>,
        store: Arc<dyn KeyValueStore>,
        mut options: ClientOptions,
    ) -> Result<Self> {
        if options.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} too short, using {:?}",
                options.poll_interval, MIN_POLL_INTERVAL
            );
            options.poll_interval = MIN_POLL_INTERVAL;
        }

        let api_key = store
            .get(API_KEY)
            .await?
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let mut snapshot = SolveSnapshot::default();
        if api_key.is_none() {
            info!("No API key configured");
            snapshot.error_state = Some(ErrorState::NoApiKey);
        }

        let (state, _) = watch::channel(snapshot);

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                store,
                options,
                api_key: RwLock::new(api_key),
                state,
                poller: Mutex::new(None),
            }),
        })
    }

    /// Current state
    pub fn snapshot(&self) -> SolveSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SolveSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.inner.state.borrow().submission_state
    }

    pub fn error_state(&self) -> Option<ErrorState> {
        self.inner.state.borrow().error_state
    }

    pub fn submission_id(&self) -> Option<u64> {
        self.inner.state.borrow().submission_id
    }

    pub fn result_url(&self) -> Option<String> {
        self.inner.state.borrow().result_url.clone()
    }

    /// Whether a polling task is currently scheduled
    pub fn is_polling(&self) -> bool {
        self.inner.state.borrow().polling
    }

    /// Human-readable status page for the current submission
    pub fn current_status_url(&self) -> Option<Url> {
        let subid = self.submission_id()?;
        Url::parse(&format!("{}{}", self.inner.options.status_base, subid)).ok()
    }

    /// Save a new API key and authenticate with it
    pub async fn set_api_key(&self, key: &str) -> Result<String> {
        let key = key.trim();
        if key.is_empty() {
            *self.inner.api_key.write().await = None;
            self.inner.store.remove(API_KEY).await?;
            self.inner.state.send_modify(|s| s.error_state = Some(ErrorState::NoApiKey));
            return Err(SolveError::MissingCredential);
        }

        self.inner.store.set(API_KEY, key).await?;
        *self.inner.api_key.write().await = Some(key.to_string());
        self.authenticate().await
    }

    /// Log in with the configured API key and cache the session token
    pub async fn authenticate(&self) -> Result<String> {
        self.inner.authenticate().await
    }

    /// Upload an image and start polling for its result
    pub async fn submit(&self, image: Vec<u8>) -> Result<u64> {
        if image.is_empty() {
            return Err(SolveError::EmptyImage);
        }

        self.inner.stop_polling();

        let Some(session) = self.inner.store.get(SESSION_KEY).await? else {
            info!("No session token, authenticating before upload");
            if let Err(e) = self.inner.authenticate().await {
                warn!("Authentication before upload failed: {}", e);
            }
            return Err(SolveError::NoSession);
        };

        let upload = &self.inner.options.upload;
        let request_json = serde_json::to_string(&UploadRequest {
            publicly_visible: &upload.publicly_visible,
            allow_modifications: &upload.allow_modifications,
            session: &session,
            allow_commercial_use: &upload.allow_commercial_use,
        })?;

        info!("Uploading image ({} bytes)", image.len());
        let response = match self.inner.api.upload(request_json, image).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Upload failed: {}", e);
                return Err(e);
            }
        };
        let subid = response.subid;
        info!("Upload accepted, submission id {}", subid);

        Inner::activate(&self.inner, subid);

        if let Err(e) = self
            .inner
            .store
            .set(LAST_SUBMISSION, &subid.to_string())
            .await
        {
            warn!("Failed to persist submission id {}: {}", subid, e);
        }

        Ok(subid)
    }

    /// Query the service once for the current submission
    pub async fn check_status(&self) -> Result<SubmissionState> {
        match self.submission_id() {
            Some(subid) if subid != 0 => self.inner.check_submission(subid).await,
            _ => Ok(self.submission_state()),
        }
    }

    /// Pick up the last persisted submission and poll it again
    ///
    /// Does nothing while a submission is already tracked.
    pub async fn resume(&self) -> Result<Option<u64>> {
        if self.submission_id().is_some() {
            return Ok(None);
        }

        let last = self.inner.store.get(LAST_SUBMISSION).await?;
        let Some(subid) = last.and_then(|v| v.parse::<u64>().ok()).filter(|id| *id != 0) else {
            debug!("No previous submission to resume");
            return Ok(None);
        };

        info!("Resuming submission {}", subid);
        Inner::activate(&self.inner, subid);
        Ok(Some(subid))
    }

    /// Cancel any scheduled polling
    pub fn shutdown(&self) {
        self.inner.stop_polling();
    }
}

impl Inner {
    async fn authenticate(&self) -> Result<String> {
        let Some(key) = self.api_key.read().await.clone() else {
            self.state.send_modify(|s| s.error_state = Some(ErrorState::NoApiKey));
            return Err(SolveError::MissingCredential);
        };

        self.state.send_modify(|s| s.error_state = None);

        let request_json = serde_json::to_string(&LoginRequest { apikey: &key })?;
        let failure = match self.api.login(request_json).await {
            Ok(resp) => match resp.session.filter(|s| !s.is_empty()) {
                Some(session) => {
                    self.store.set(SESSION_KEY, &session).await?;
                    info!("Authenticated, session token cached");
                    return Ok(session);
                }
                None => {
                    let reason = resp
                        .errormessage
                        .or(resp.status)
                        .unwrap_or_else(|| "no session in login response".to_string());
                    SolveError::AuthenticationFailure(reason)
                }
            },
            Err(e) => SolveError::AuthenticationFailure(e.to_string()),
        };

        warn!("{}", failure);
        self.state.send_modify(|s| s.error_state = Some(ErrorState::Unauthorized));
        if let Err(e) = self.store.remove(SESSION_KEY).await {
            warn!("Failed to clear stale session token: {}", e);
        }
        Err(failure)
    }

    /// Fetch status for `subid` and apply it if `subid` is still current
    async fn check_submission(&self, subid: u64) -> Result<SubmissionState> {
        debug!("Checking status of submission {}", subid);
        let response = self.api.submission_status(subid).await?;

        if self.state.borrow().submission_id != Some(subid) {
            debug!("Discarding status for superseded submission {}", subid);
            return Ok(self.state.borrow().submission_state);
        }

        if response.job_calibrations.is_empty() {
            debug!("Submission {} still processing", subid);
            return Ok(self.state.borrow().submission_state);
        }

        let result_url = response
            .first_job_id()
            .map(|job_id| format!("{}{}", self.options.annotated_base, job_id));
        if result_url.is_none() {
            warn!("Submission {} has an empty calibration entry", subid);
        }

        // Lock order everywhere: poller, then state
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let mut applied = false;
        self.state.send_modify(|s| {
            if s.submission_id == Some(subid) {
                s.submission_state = SubmissionState::Done;
                s.result_url = result_url.clone();
                s.polling = false;
                applied = true;
            }
        });

        if !applied {
            return Ok(self.state.borrow().submission_state);
        }

        if poller.as_ref().is_some_and(|guard| guard.submission_id == subid) {
            poller.take();
        }
        drop(poller);

        info!(
            "Submission {} solved: {}",
            subid,
            result_url.as_deref().unwrap_or("<no job id>")
        );
        Ok(SubmissionState::Done)
    }

    /// Make `subid` the current submission and start polling it
    ///
    /// The published id and the polling guard change together under the
    /// poller lock, so overlapping uploads cannot leave the poller on a
    /// different submission than the one observers see.
    fn activate(this: &Arc<Self>, subid: u64) {
        let period = this.options.poll_interval;
        let mut poller = this.poller.lock().unwrap_or_else(PoisonError::into_inner);

        this.state.send_modify(|s| {
            s.submission_state = SubmissionState::Processing;
            s.submission_id = Some(subid);
            s.result_url = None;
            s.polling = true;
        });

        let handle = tokio::spawn(poll_loop(Arc::downgrade(this), subid, period));
        let previous = poller.replace(PollGuard {
            submission_id: subid,
            handle,
        });
        drop(poller);
        drop(previous);

        info!("Polling submission {} every {:?}", subid, period);
    }

    /// Cancel the polling task, if any
    fn stop_polling(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(guard) = poller.take() else {
            return;
        };

        debug!("Stopped polling submission {}", guard.submission_id);
        self.state.send_modify(|s| s.polling = false);
    }
}

async fn poll_loop(client: Weak<Inner>, subid: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let Some(inner) = client.upgrade() else {
            debug!("Client dropped, polling for {} ends", subid);
            break;
        };

        match inner.check_submission(subid).await {
            Ok(SubmissionState::Done) => break,
            Ok(_) => {}
            Err(e) => warn!("Status check for submission {} failed: {}", subid, e),
        }
    }
}
