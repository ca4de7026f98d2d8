use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::catalog::{ProductCatalog, WatershedCatalog};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::job::{Artifact, DEFAULT_JOB_TIMEOUT, DEFAULT_POLL_INTERVAL, Poller};
use crate::payload::ExtractionPayload;

#[derive(Debug, Clone)]
pub struct GridRequest {
    pub slug: String,
    pub products: Vec<String>,
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub timeout: Duration,
    pub interval: Duration,
}

impl GridRequest {
    pub fn new(
        slug: impl Into<String>,
        products: Vec<String>,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Self {
        Self {
            slug: slug.into(),
            products,
            after,
            before,
            timeout: DEFAULT_JOB_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Resolves the watershed and products, submits the extraction job and waits
/// for its artifact.
///
/// Nothing is submitted unless the slug and at least one product resolve.
pub fn grid(client: &Client, req: &GridRequest) -> Result<Artifact> {
    if req.products.is_empty() {
        return Err(Error::MissingOption("product"));
    }

    let watersheds = WatershedCatalog::fetch(client)?;
    let watershed = watersheds.resolve(&req.slug)?;
    tracing::info!(slug = %watershed.slug, name = %watershed.name, id = %watershed.id, "watershed resolved");

    let products = ProductCatalog::fetch(client)?;
    let product_ids = products.resolve_ids(req.products.as_slice())?;
    tracing::info!(count = product_ids.len(), "products resolved");

    let payload = ExtractionPayload::new(req.after, req.before, watershed.id, product_ids);

    Poller::new(client)
        .with_timeout(req.timeout)
        .with_interval(req.interval)
        .run(&payload)
}
