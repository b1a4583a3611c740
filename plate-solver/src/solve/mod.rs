//! Plate-solving submission client
//!
//! ## Main Components
//! - `SolveClient`: authenticate, upload, poll the status endpoint until a calibration appears
//! - `SolveApi` / `HttpSolveApi`: the three service endpoints over HTTP
//! - `KeyValueStore`: persisted API key, session token and last submission id

pub mod api;
pub mod client;
pub mod error;
pub mod store;
pub mod types;

pub use api::{HttpSolveApi, SolveApi};
pub use client::{ClientOptions, SolveClient, UploadOptions};
pub use error::{Result, SolveError};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{ErrorState, SolveSnapshot, SubmissionState};
