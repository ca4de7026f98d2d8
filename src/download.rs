use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client as HttpClient;
use url::Url;

use crate::error::{Error, Result, api_error};

pub const TEMP_PREFIX: &str = "cumulus_";
pub const TEMP_SUFFIX: &str = ".dss";

/// Streams `url` into a new `cumulus_<random>.dss` file inside `dir` and
/// returns its path. The file only survives if the whole body was written.
pub(crate) fn download_to_temp(
    http: &HttpClient,
    url: &Url,
    dir: &Path,
    timeout: Duration,
    progress: bool,
) -> Result<PathBuf> {
    let mut resp = http
        .get(url.clone())
        .timeout(timeout)
        .send()
        .map_err(|e| Error::transport(url.as_str(), e))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        return Err(api_error(status, url.as_str(), &text));
    }

    let mut out = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;

    let pb = match (progress, resp.content_length()) {
        (true, Some(len)) => {
            let pb = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            Some(pb)
        }
        _ => None,
    };

    let mut downloaded: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        downloaded += n as u64;
        if let Some(pb) = &pb {
            pb.inc(n as u64);
        }
    }
    out.flush()?;

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let (_, path) = out.keep().map_err(|e| Error::Io(e.error))?;
    tracing::debug!(url = %url, bytes = downloaded, path = %path.display(), "artifact written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn http() -> HttpClient {
        HttpClient::new()
    }

    #[test]
    fn writes_body_to_uniquely_named_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/results/grid.dss");
            then.status(200).body("DSS-BYTES");
        });
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse(&server.url("/results/grid.dss")).unwrap();

        let first = download_to_temp(&http(), &url, dir.path(), Duration::from_secs(5), false)
            .unwrap();
        let second = download_to_temp(&http(), &url, dir.path(), Duration::from_secs(5), true)
            .unwrap();

        assert_ne!(first, second);
        for path in [&first, &second] {
            assert_eq!(path.parent(), Some(dir.path()));
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with(TEMP_PREFIX), "{name}");
            assert!(name.ends_with(TEMP_SUFFIX), "{name}");
            assert_eq!(std::fs::read(path).unwrap(), b"DSS-BYTES");
        }
    }

    #[test]
    fn http_error_leaves_no_file_behind() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/results/missing.dss");
            then.status(404).body("gone");
        });
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse(&server.url("/results/missing.dss")).unwrap();

        let err = download_to_temp(&http(), &url, dir.path(), Duration::from_secs(5), false)
            .unwrap_err();

        assert!(matches!(err, Error::Api { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/a.dss");
            then.status(200).body("x");
        });
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let url = Url::parse(&server.url("/a.dss")).unwrap();

        let err =
            download_to_temp(&http(), &url, &missing, Duration::from_secs(5), false).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
