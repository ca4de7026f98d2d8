use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;

use crate::util::retriable_status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("'{0}' is not an allowable host")]
    HostNotAllowed(String),

    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("invalid {field} time '{value}' (expected RFC3339): {source}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid time window: after ({after}) must be earlier than before ({before})")]
    InvalidWindow { after: String, before: String },

    #[error("slug '{0}' not found")]
    SlugNotFound(String),

    #[error("product list is empty; none of [{}] matched a known product", .0.join(", "))]
    EmptyProductList(Vec<String>),

    #[error("output directory {} does not exist", .0.display())]
    MissingOutputDir(PathBuf),

    #[error("invalid url '{input}': {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for url ({url}){}", fmt_detail(.message))]
    Api {
        status: StatusCode,
        url: String,
        message: String,
    },

    #[error("failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("job submission to {url} failed")]
    Submission {
        url: String,
        #[source]
        source: Box<Error>,
    },

    #[error("job creation response carried no job id")]
    MissingJobId,

    #[error("job {id} failed (status {status}, progress {progress}%)")]
    JobFailed {
        id: String,
        status: String,
        progress: i64,
    },

    #[error("no result produced: job {id} did not finish within {}s", .timeout.as_secs())]
    TimedOut { id: String, timeout: Duration },

    #[error("failed to download {url}")]
    Download {
        url: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Api { status, .. } => retriable_status(status.as_u16()),
            _ => false,
        }
    }

    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn download(url: &str, source: Error) -> Self {
        Self::Download {
            url: url.to_string(),
            source: Box::new(source),
        }
    }
}

fn fmt_detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

// The service answers with a handful of shapes: {"message": ...},
// {"title": ..., "detail": ...} or a bare string.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ServiceErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

/// Turns a non-success response into an [`Error::Api`], pulling a readable
/// message out of the body when the service sent one.
pub(crate) fn api_error(status: StatusCode, url: &str, body: &str) -> Error {
    let message = match serde_json::from_str::<ServiceErrorBody>(body) {
        Ok(parsed) => {
            let head = parsed
                .message
                .or(parsed.title)
                .or(parsed.error)
                .unwrap_or_default();
            match parsed.detail {
                Some(detail) if !detail.is_empty() && !head.is_empty() => {
                    format!("{head}. {detail}")
                }
                Some(detail) if !detail.is_empty() => detail,
                _ => head,
            }
        }
        Err(_) => body.trim().chars().take(512).collect(),
    };

    Error::Api {
        status,
        url: url.to_string(),
        message,
    }
}
