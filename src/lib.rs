//! Client for the Cumulus watershed data service.
//!
//! The main flow (`grid`) resolves a watershed slug and product slugs to
//! service ids, submits an extraction job, polls the job until it finishes and
//! downloads the resulting DSS file. `extract` and `get` are simpler
//! synchronous reads.
//!
//! ```no_run
//! use cumulus::{Client, ClientConfig, GridRequest, grid};
//! use chrono::{Duration, Utc};
//! use url::Url;
//!
//! fn main() -> Result<(), cumulus::Error> {
//!     let base = Url::parse("https://cumulus-api.corps.cloud").expect("static url");
//!     let client = Client::new(ClientConfig::new(base).with_token("<token>"))?;
//!
//!     let before = Utc::now();
//!     let req = GridRequest::new(
//!         "kanawha-river",
//!         vec!["nws-stageiv-qpe-01h".to_string()],
//!         before - Duration::days(7),
//!         before,
//!     );
//!     let artifact = grid(&client, &req)?;
//!     println!("{artifact}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod catalog;
mod client;
pub mod config;
mod download;
mod error;
pub mod extract;
mod grid;
pub mod job;
mod payload;
mod util;

pub use catalog::{Product, ProductCatalog, Watershed, WatershedCatalog};
pub use client::{
    Client, ClientConfig, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_DOWNLOADS_ENDPOINT,
    DEFAULT_POLL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{Error, Result};
pub use grid::{GridRequest, grid};
pub use job::{Artifact, Clock, JobService, JobState, JobStatus, Poller, SystemClock};
pub use payload::ExtractionPayload;
