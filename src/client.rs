use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::download::download_to_temp;
use crate::error::{Error, Result, api_error};
use crate::job::{JobService, JobStatus};
use crate::payload::ExtractionPayload;

/// Per-request timeout for catalog lookups and job submission.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for a single job status poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for streaming bodies (artifacts, extracts).
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_DOWNLOADS_ENDPOINT: &str = "downloads";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme and host of the service, e.g. `https://cumulus-api.corps.cloud`.
    pub base_url: Url,
    /// Bearer token sent with job submissions.
    pub token: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            verify: true,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    token: Option<String>,

    poll_timeout: Duration,
    download_timeout: Duration,
    downloads_endpoint: String,
    download_dir: Option<PathBuf>,
    progress: bool,

    http: HttpClient,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cumulus-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("cumulus-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(DEFAULT_REQUEST_TIMEOUT);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::transport(cfg.base_url.as_str(), e))?;

        // Url::join drops the last path segment unless the base ends with '/'.
        let mut base_url = cfg.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            token: cfg.token,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            downloads_endpoint: DEFAULT_DOWNLOADS_ENDPOINT.to_string(),
            download_dir: None,
            progress: false,
            http,
        })
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Path (relative to the base URL) jobs are POSTed to; status lives at `<path>/<id>`.
    pub fn with_downloads_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.downloads_endpoint = endpoint.into().trim_matches('/').to_string();
        self
    }

    /// Directory artifacts are written to. Defaults to the OS temp dir.
    pub fn with_download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL. Absolute URLs pass through unchanged.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let relative = path.trim_start_matches('/');
        self.base_url.join(relative).map_err(|source| Error::InvalidUrl {
            input: path.to_string(),
            source,
        })
    }

    /// Liveness probe against the base URL. Any HTTP answer counts as up.
    pub fn check_service(&self) -> Result<()> {
        let url = self.base_url.as_str();
        let resp = self
            .http
            .get(url)
            .send()
            .map_err(|e| Error::transport(url, e))?;
        tracing::debug!(url, status = %resp.status(), "service probe answered");
        Ok(())
    }

    pub fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.fetch_bytes(self.http.get(url.clone()), url)
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let body = self.get_bytes(url)?;
        decode(url, &body)
    }

    /// POSTs `body` as JSON with the bearer token attached.
    pub fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        url: &Url,
        body: &TReq,
    ) -> Result<TResp> {
        let req = self.apply_auth(self.http.post(url.clone()).json(body));
        let bytes = self.fetch_bytes(req, url)?;
        decode(url, &bytes)
    }

    /// Opens a streaming GET; the caller reads the body incrementally.
    pub fn open(&self, url: &Url) -> Result<Response> {
        let resp = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .timeout(self.download_timeout)
            .send()
            .map_err(|e| Error::transport(url.as_str(), e))?;
        check_status(resp, url)
    }

    fn fetch_bytes(&self, req: RequestBuilder, url: &Url) -> Result<Vec<u8>> {
        let resp = req
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| Error::transport(url.as_str(), e))?;
        let resp = check_status(resp, url)?;
        let bytes = resp
            .bytes()
            .map_err(|e| Error::transport(url.as_str(), e))?;
        Ok(bytes.to_vec())
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token.trim()),
            None => req,
        }
    }

    fn status_url(&self, id: &str) -> Result<Url> {
        self.endpoint(&format!("{}/{}", self.downloads_endpoint, id))
    }
}

impl JobService for Client {
    fn submit(&self, payload: &ExtractionPayload) -> Result<JobStatus> {
        let url = self.endpoint(&self.downloads_endpoint)?;
        tracing::debug!(url = %url, "submitting extraction job");
        self.post_json(&url, payload)
            .and_then(|job: JobStatus| {
                if job.id.trim().is_empty() {
                    Err(Error::MissingJobId)
                } else {
                    Ok(job)
                }
            })
            .map_err(|source| Error::Submission {
                url: url.to_string(),
                source: Box::new(source),
            })
    }

    fn status(&self, id: &str) -> Result<JobStatus> {
        let url = self.status_url(id)?;
        let req = self.http.get(url.clone()).timeout(self.poll_timeout);
        let body = self.fetch_bytes(req, &url)?;
        decode(&url, &body)
    }

    fn download(&self, file: &str) -> Result<PathBuf> {
        let url = self
            .endpoint(file)
            .map_err(|e| Error::download(file, e))?;
        let dir = self.download_dir.clone().unwrap_or_else(std::env::temp_dir);
        download_to_temp(&self.http, &url, &dir, self.download_timeout, self.progress)
            .map_err(|e| Error::download(url.as_str(), e))
    }
}

fn check_status(resp: Response, url: &Url) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    Err(api_error(status, url.as_str(), &text))
}

fn decode<T: DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn client_for(server: &MockServer) -> Client {
        let base = Url::parse(&server.base_url()).expect("mock url");
        Client::new(ClientConfig::new(base).with_token("secret-token")).expect("client")
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let base = Url::parse("https://example.test/api").unwrap();
        let client = Client::new(ClientConfig::new(base)).unwrap();
        assert_eq!(
            client.endpoint("watersheds").unwrap().as_str(),
            "https://example.test/api/watersheds"
        );
        assert_eq!(
            client.endpoint("/products").unwrap().as_str(),
            "https://example.test/api/products"
        );
        assert_eq!(
            client.endpoint("https://files.test/a.dss").unwrap().as_str(),
            "https://files.test/a.dss"
        );
    }

    #[test]
    fn empty_token_is_dropped() {
        let cfg = ClientConfig::new(Url::parse("http://localhost").unwrap()).with_token("  ");
        assert!(cfg.token.is_none());
    }

    #[test]
    fn get_json_sends_accept_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/watersheds")
                .header("accept", "application/json");
            then.status(200).json_body(json!([]));
        });

        let client = client_for(&server);
        let url = client.endpoint("watersheds").unwrap();
        let list: Vec<serde_json::Value> = client.get_json(&url).unwrap();
        assert!(list.is_empty());
        mock.assert();
    }

    #[test]
    fn non_success_status_is_an_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/products");
            then.status(503).json_body(json!({"message": "maintenance"}));
        });

        let client = client_for(&server);
        let url = client.endpoint("products").unwrap();
        let err = client.get_bytes(&url).unwrap_err();
        match &err {
            Error::Api { status, message, .. } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn submit_posts_payload_with_bearer_token() {
        let server = MockServer::start();
        let watershed = Uuid::from_u128(7);
        let product = Uuid::from_u128(9);
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/downloads")
                .header("authorization", "Bearer secret-token")
                .header("content-type", "application/json")
                .json_body(json!({
                    "datetime_start": "2024-03-01T00:00:00Z",
                    "datetime_end": "2024-03-08T00:00:00Z",
                    "watershed_id": watershed.to_string(),
                    "product_id": [product.to_string()],
                }));
            then.status(201)
                .json_body(json!({"id": "job-1", "status": "INITIATED", "progress": 0}));
        });

        let client = client_for(&server);
        let payload = ExtractionPayload::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
            watershed,
            vec![product],
        );
        let status = client.submit(&payload).unwrap();
        assert_eq!(status.id, "job-1");
        assert_eq!(status.status, JobState::Other("INITIATED".into()));
        mock.assert();
    }

    #[test]
    fn submit_failure_is_wrapped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/downloads");
            then.status(401).json_body(json!({"message": "unauthorized"}));
        });

        let client = client_for(&server);
        let payload = ExtractionPayload::new(Utc::now(), Utc::now(), Uuid::nil(), vec![]);
        let err = client.submit(&payload).unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));
    }

    #[test]
    fn submission_without_job_id_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/downloads");
            then.status(201).json_body(json!({"message": "accepted"}));
        });
        let list = server.mock(|when, then| {
            when.method(GET).path("/downloads/");
            then.status(200).json_body(json!([]));
        });

        let client = client_for(&server);
        let payload = ExtractionPayload::new(Utc::now(), Utc::now(), Uuid::nil(), vec![]);
        let err = client.submit(&payload).unwrap_err();

        match err {
            Error::Submission { source, .. } => assert!(matches!(*source, Error::MissingJobId)),
            other => panic!("unexpected error: {other:?}"),
        }
        list.assert_hits(0);
    }

    #[test]
    fn slow_status_poll_is_a_transient_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/downloads/job-slow");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({"id": "job-slow", "status": "RUNNING"}));
        });

        let client = client_for(&server).with_poll_timeout(Duration::from_millis(50));
        let err = client.status("job-slow").unwrap_err();

        assert!(matches!(err, Error::Transport { ref source, .. } if source.is_timeout()));
        assert!(err.is_transient());
    }

    #[test]
    fn refused_connection_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let base = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let client = Client::new(ClientConfig::new(base)).unwrap();

        let err = client.status("job-1").unwrap_err();

        assert!(matches!(err, Error::Transport { ref source, .. } if source.is_connect()));
        assert!(err.is_transient());
    }

    #[test]
    fn status_is_read_from_downloads_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/downloads/job-1");
            then.status(200).json_body(json!({
                "id": "job-1",
                "status": "SUCCESS",
                "progress": 100,
                "file": "https://files.test/cumulus.dss",
            }));
        });

        let client = client_for(&server);
        let status = client.status("job-1").unwrap();
        assert_eq!(status.status, JobState::Success);
        assert_eq!(status.artifact_url(), Some("https://files.test/cumulus.dss"));
        mock.assert();
    }

    #[test]
    fn custom_downloads_endpoint_drives_both_urls() {
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST).path("/v2/jobs");
            then.status(200).json_body(json!({"id": "j9", "status": "PENDING"}));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/v2/jobs/j9");
            then.status(200).json_body(json!({"id": "j9", "status": "RUNNING", "progress": 5}));
        });

        let client = client_for(&server).with_downloads_endpoint("/v2/jobs/");
        let payload = ExtractionPayload::new(Utc::now(), Utc::now(), Uuid::nil(), vec![]);
        let job = client.submit(&payload).unwrap();
        let status = client.status(&job.id).unwrap();
        assert_eq!(status.progress, 5);
        submit.assert();
        poll.assert();
    }

    #[test]
    fn check_service_accepts_any_http_answer() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(404);
        });
        assert!(client_for(&server).check_service().is_ok());
    }
}
