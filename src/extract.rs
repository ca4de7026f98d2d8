//! Synchronous modes: line-streamed `extract` and plain `get`.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::util::{extract_endpoint, trim_line};

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Path relative to the service base URL.
    pub endpoint: String,
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    /// File the collected lines are written to.
    pub out: Option<PathBuf>,
}

impl ExtractRequest {
    /// Extract request against `watersheds/{slug}/extract`.
    pub fn for_watershed(slug: &str, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            endpoint: extract_endpoint(slug),
            after,
            before,
            out: None,
        }
    }

    pub fn with_out(mut self, out: Option<PathBuf>) -> Self {
        self.out = out;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub lines: usize,
    pub bytes: usize,
}

/// Streams the extract endpoint line by line. Each trimmed, non-blank line is
/// echoed to `echo` (when given) and collected for `req.out`.
pub fn extract(
    client: &Client,
    req: &ExtractRequest,
    mut echo: Option<&mut dyn Write>,
) -> Result<ExtractSummary> {
    if let Some(out) = &req.out {
        ensure_parent_dir(out)?;
    }

    let mut url = client.endpoint(&req.endpoint)?;
    url.query_pairs_mut()
        .append_pair("after", &req.after.to_rfc3339_opts(SecondsFormat::Secs, true))
        .append_pair("before", &req.before.to_rfc3339_opts(SecondsFormat::Secs, true));
    tracing::info!(url = %url, "extracting");

    let resp = client.open(&url)?;
    let mut reader = BufReader::new(resp);

    let mut summary = ExtractSummary::default();
    let mut buffer = Vec::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw)?;
        if n == 0 {
            break;
        }
        let line = trim_line(&raw);
        if line.is_empty() {
            continue;
        }
        if let Some(sink) = echo.as_deref_mut() {
            sink.write_all(line)?;
            sink.write_all(b"\n")?;
        }
        buffer.extend_from_slice(line);
        buffer.push(b'\n');
        summary.lines += 1;
        summary.bytes += line.len();
    }
    if let Some(sink) = echo.as_deref_mut() {
        sink.flush()?;
    }

    if let Some(out) = &req.out {
        std::fs::write(out, &buffer)?;
        tracing::info!(path = %out.display(), lines = summary.lines, "extract written");
    }
    Ok(summary)
}

/// Fetches `endpoint` once and hands the body to `echo` and/or `out`.
pub fn get(
    client: &Client,
    endpoint: &str,
    echo: Option<&mut dyn Write>,
    out: Option<&Path>,
) -> Result<usize> {
    if let Some(out) = out {
        ensure_parent_dir(out)?;
    }

    let url = client.endpoint(endpoint)?;
    tracing::info!(url = %url, "fetching");
    let body = client.get_bytes(&url)?;

    if let Some(sink) = echo {
        sink.write_all(&body)?;
        sink.flush()?;
    }
    if let Some(out) = out {
        std::fs::write(out, &body)?;
        tracing::info!(path = %out.display(), bytes = body.len(), "response written");
    }
    Ok(body.len())
}

fn ensure_parent_dir(out: &Path) -> Result<()> {
    let parent = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if parent.is_dir() {
        Ok(())
    } else {
        Err(Error::MissingOutputDir(parent.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use url::Url;

    fn client_for(server: &MockServer) -> Client {
        Client::new(ClientConfig::new(Url::parse(&server.base_url()).unwrap())).unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn extract_streams_lines_to_echo_and_file() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/watersheds/kanawha-river/extract")
                .query_param("after", "2024-05-01T00:00:00Z")
                .query_param("before", "2024-05-08T00:00:00Z");
            then.status(200)
                .body("{\"site\":\"a\"}\r\n\n  {\"site\":\"b\"}  \n{\"site\":\"c\"}");
        });

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("extract.jsonl");
        let (after, before) = window();
        let req = ExtractRequest::for_watershed("kanawha-river", after, before)
            .with_out(Some(out.clone()));

        let mut echoed = Vec::new();
        let summary = extract(&client_for(&server), &req, Some(&mut echoed)).unwrap();

        let expected = "{\"site\":\"a\"}\n{\"site\":\"b\"}\n{\"site\":\"c\"}\n";
        assert_eq!(summary.lines, 3);
        assert_eq!(String::from_utf8(echoed).unwrap(), expected);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), expected);
        mock.assert();
    }

    #[test]
    fn extract_without_sinks_still_counts_lines() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/providers/lrh/timeseries_groups/stage/values");
            then.status(200).body("1\n2\n");
        });

        let (after, before) = window();
        let req = ExtractRequest {
            endpoint: "providers/lrh/timeseries_groups/stage/values".into(),
            after,
            before,
            out: None,
        };
        let summary = extract(&client_for(&server), &req, None).unwrap();
        assert_eq!(summary, ExtractSummary { lines: 2, bytes: 2 });
    }

    #[test]
    fn extract_missing_output_dir_aborts_before_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/watersheds/kanawha-river/extract");
            then.status(200).body("1\n");
        });

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing").join("extract.jsonl");
        let (after, before) = window();
        let req = ExtractRequest::for_watershed("kanawha-river", after, before).with_out(Some(out));

        let err = extract(&client_for(&server), &req, None).unwrap_err();
        assert!(matches!(err, Error::MissingOutputDir(ref p) if p.ends_with("missing")));
        mock.assert_hits(0);
    }

    #[test]
    fn extract_http_error_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/watersheds/nowhere/extract");
            then.status(404).json_body(serde_json::json!({"message": "not found"}));
        });

        let (after, before) = window();
        let req = ExtractRequest::for_watershed("nowhere", after, before);
        let err = extract(&client_for(&server), &req, None).unwrap_err();
        assert!(matches!(err, Error::Api { .. }));
    }

    #[test]
    fn get_echoes_and_writes_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/watersheds");
            then.status(200).body("[{\"slug\":\"kanawha-river\"}]");
        });

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("watersheds.json");
        let mut echoed = Vec::new();
        let n = get(&client_for(&server), "watersheds", Some(&mut echoed), Some(&out)).unwrap();

        assert_eq!(n, echoed.len());
        assert_eq!(echoed, b"[{\"slug\":\"kanawha-river\"}]");
        assert_eq!(std::fs::read(&out).unwrap(), echoed);
    }
}
