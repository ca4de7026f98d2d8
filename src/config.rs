//! Layered configuration.
//!
//! Lowest to highest precedence: built-in defaults, rc file, command-line
//! flags (and their `CUMULUS_*` environment variables), JSON on stdin. A layer
//! only overrides what it actually sets; empty strings, empty product lists and
//! a zero timeout count as unset.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Days, DurationRound, TimeDelta, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::{Error, Result};
use crate::job::DEFAULT_JOB_TIMEOUT;

pub const DEFAULT_SCHEME: &str = "https";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_WINDOW_DAYS: u64 = 7;

pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "localhost",
    "cumulus-api.corps.cloud",
    "develop-cumulus-api.corps.cloud",
    "water-api.corps.cloud",
    "develop-water-api.corps.cloud",
    "cumulus-api.rsgis.dev",
    "develop-cumulus-api.rsgis.dev",
    "water-api.rsgis.dev",
    "develop-water-api.rsgis.dev",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Grid,
    Extract,
    Get,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "extract" => Ok(Self::Extract),
            "get" => Ok(Self::Get),
            other => Err(format!(
                "expecting one of 'grid', 'extract' or 'get'; '{other}' provided"
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grid => "grid",
            Self::Extract => "extract",
            Self::Get => "get",
        })
    }
}

/// One configuration source. Field names on the wire follow the JSON callers
/// already send on stdin (`Scheme`, `Host`, `StdOut`, ...).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    #[serde(rename = "Subcommand", alias = "subcommand", deserialize_with = "optional_mode")]
    pub mode: Option<Mode>,
    #[serde(rename = "Scheme", alias = "scheme")]
    pub scheme: Option<String>,
    #[serde(rename = "Host", alias = "host")]
    pub host: Option<String>,
    #[serde(rename = "Auth", alias = "auth")]
    pub auth: Option<String>,
    #[serde(rename = "Slug", alias = "slug")]
    pub slug: Option<String>,
    #[serde(rename = "Products", alias = "products")]
    pub products: Option<Vec<String>>,
    #[serde(rename = "After", alias = "after")]
    pub after: Option<String>,
    #[serde(rename = "Before", alias = "before")]
    pub before: Option<String>,
    #[serde(rename = "StdOut", alias = "stdout", deserialize_with = "flexible_bool")]
    pub stdout: Option<bool>,
    #[serde(rename = "OutFile", alias = "out", alias = "outfile")]
    pub out: Option<PathBuf>,
    #[serde(rename = "Endpoint", alias = "endpoint")]
    pub endpoint: Option<String>,
    #[serde(rename = "Timeout", alias = "timeout", deserialize_with = "flexible_secs")]
    pub timeout: Option<u64>,
    #[serde(rename = "Verify", alias = "verify", deserialize_with = "flexible_bool")]
    pub verify: Option<bool>,
    #[serde(rename = "Dir", alias = "dir")]
    pub dir: Option<PathBuf>,
}

impl ConfigLayer {
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Returns `self` overridden by every value `higher` sets. The mode is
    /// the exception: an explicit subcommand is only filled in, never replaced.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            mode: self.mode.or(higher.mode),
            scheme: pick_text(self.scheme, higher.scheme),
            host: pick_text(self.host, higher.host),
            auth: pick_text(self.auth, higher.auth),
            slug: pick_text(self.slug, higher.slug),
            products: pick_list(self.products, higher.products),
            after: pick_text(self.after, higher.after),
            before: pick_text(self.before, higher.before),
            stdout: higher.stdout.or(self.stdout),
            out: pick_path(self.out, higher.out),
            endpoint: pick_text(self.endpoint, higher.endpoint),
            timeout: higher.timeout.filter(|t| *t > 0).or(self.timeout),
            verify: higher.verify.or(self.verify),
            dir: pick_path(self.dir, higher.dir),
        }
    }
}

fn pick_text(lower: Option<String>, higher: Option<String>) -> Option<String> {
    higher.filter(|s| !s.trim().is_empty()).or(lower)
}

fn pick_list(lower: Option<Vec<String>>, higher: Option<Vec<String>>) -> Option<Vec<String>> {
    higher.filter(|v| !v.is_empty()).or(lower)
}

fn pick_path(lower: Option<PathBuf>, higher: Option<PathBuf>) -> Option<PathBuf> {
    higher.filter(|p| !p.as_os_str().is_empty()).or(lower)
}

fn optional_mode<'de, D>(deserializer: D) -> std::result::Result<Option<Mode>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.trim().is_empty() => s.parse().map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Bool(b)) => Ok(Some(b)),
        Some(Raw::Text(s)) => parse_bool(&s).map_err(D::Error::custom),
    }
}

fn flexible_secs<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(n)) => Ok(Some(n)),
        Some(Raw::Float(f)) if f.is_finite() && f >= 0.0 => Ok(Some(f.round() as u64)),
        Some(Raw::Float(f)) => Err(D::Error::custom(format!("invalid timeout {f}"))),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid timeout '{s}'"))),
    }
}

fn parse_bool(s: &str) -> std::result::Result<Option<bool>, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        other => Err(format!("invalid boolean '{other}'")),
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub mode: Option<Mode>,
    pub scheme: String,
    pub host: String,
    pub auth: Option<String>,
    pub slug: Option<String>,
    pub products: Vec<String>,
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub stdout: bool,
    pub out: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub verify: bool,
    pub dir: Option<PathBuf>,
}

impl Options {
    /// Applies defaults to a merged layer. `now` anchors the default window
    /// (`now - 7 days` .. `now`). `get` has no time window, so its
    /// `after`/`before` values are ignored.
    pub fn resolve(layer: ConfigLayer, now: DateTime<Utc>) -> Result<Self> {
        let now = now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now);
        let windowed = layer.mode != Some(Mode::Get);
        let after = match layer.after.as_deref().filter(|_| windowed) {
            Some(s) => parse_time("after", s)?,
            None => now
                .checked_sub_days(Days::new(DEFAULT_WINDOW_DAYS))
                .unwrap_or(now),
        };
        let before = match layer.before.as_deref().filter(|_| windowed) {
            Some(s) => parse_time("before", s)?,
            None => now,
        };
        if after >= before {
            return Err(Error::InvalidWindow {
                after: after.to_rfc3339(),
                before: before.to_rfc3339(),
            });
        }

        Ok(Self {
            mode: layer.mode,
            scheme: layer.scheme.unwrap_or_else(|| DEFAULT_SCHEME.to_string()),
            host: layer.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            auth: layer.auth,
            slug: layer.slug,
            products: layer.products.unwrap_or_default(),
            after,
            before,
            stdout: layer.stdout.unwrap_or(false),
            out: layer.out,
            endpoint: layer.endpoint,
            timeout: layer
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_JOB_TIMEOUT),
            verify: layer.verify.unwrap_or(true),
            dir: layer.dir,
        })
    }

    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("{}://{}", self.scheme, self.host);
        Url::parse(&raw).map_err(|source| Error::InvalidUrl { input: raw, source })
    }

    pub fn require_slug(&self) -> Result<&str> {
        self.slug
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(Error::MissingOption("slug"))
    }
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| Error::InvalidTimestamp {
            field,
            value: value.to_string(),
            source,
        })
}

/// Hosts the client is willing to contact.
#[derive(Debug, Clone)]
pub struct HostAllowlist {
    hosts: HashSet<String>,
}

impl Default for HostAllowlist {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS.iter().copied())
    }
}

impl HostAllowlist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn with_hosts<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hosts.extend(Self::new(extra).hosts);
        self
    }

    /// Accepts `host` when it, or its name without a `:port` suffix, is listed.
    pub fn check(&self, host: &str) -> Result<()> {
        let host = host.trim().to_ascii_lowercase();
        if self.hosts.contains(&host) {
            return Ok(());
        }
        if let Some((name, port)) = host.rsplit_once(':') {
            if !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && self.hosts.contains(name)
            {
                return Ok(());
            }
        }
        Err(Error::HostNotAllowed(host))
    }
}

/// Reads the rc file layer, if any.
///
/// Search order:
/// 1) `explicit` (from `--config`)
/// 2) `CUMULUS_RC`
/// 3) `./.cumulusrc`
/// 4) `~/.cumulusrc`
pub fn load_rc_layer(explicit: Option<&Path>) -> anyhow::Result<ConfigLayer> {
    if let Some(path) = explicit {
        return read_rc(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()));
    }

    for rc_path in rc_candidates() {
        if rc_path.exists() {
            tracing::debug!(path = %rc_path.display(), "reading rc file");
            return read_rc(&rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            });
        }
    }
    Ok(ConfigLayer::default())
}

fn read_rc(path: &Path) -> anyhow::Result<ConfigLayer> {
    let text = std::fs::read_to_string(path)?;
    parse_rc(&text)
}

fn parse_rc(text: &str) -> anyhow::Result<ConfigLayer> {
    let mut cfg = ConfigLayer::default();

    // Support formatting where `auth:` is on one line and the token is on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                apply_rc_value(&mut cfg, pk, strip_quotes(line))?;
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if v.is_empty() {
                pending_key = Some(k);
            } else {
                apply_rc_value(&mut cfg, k, v)?;
            }
        }
    }

    Ok(cfg)
}

fn apply_rc_value(cfg: &mut ConfigLayer, key: &str, value: &str) -> anyhow::Result<()> {
    match key.to_ascii_lowercase().as_str() {
        "scheme" => cfg.scheme = Some(value.to_string()),
        "host" => cfg.host = Some(value.to_string()),
        "auth" | "token" => cfg.auth = Some(value.to_string()),
        "verify" => cfg.verify = parse_bool(value).map_err(anyhow::Error::msg)?,
        "timeout" => {
            cfg.timeout = Some(
                value
                    .parse()
                    .with_context(|| format!("invalid timeout '{value}'"))?,
            )
        }
        "dir" => cfg.dir = Some(PathBuf::from(value)),
        other => tracing::debug!(key = other, "ignoring unknown rc key"),
    }
    Ok(())
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("CUMULUS_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".cumulusrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".cumulusrc"));
    }
    v
}
