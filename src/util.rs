pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

pub(crate) const EXTRACT_ENDPOINT: &str = "watersheds/:slug/extract";

pub(crate) fn extract_endpoint(slug: &str) -> String {
    EXTRACT_ENDPOINT.replacen(":slug", slug, 1)
}

/// Strips leading/trailing ASCII whitespace (including `\r\n`) from a raw line.
pub(crate) fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}
