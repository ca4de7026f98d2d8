use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cumulus::config::{self, ConfigLayer, HostAllowlist, Mode, Options};
use cumulus::extract::{self, ExtractRequest};
use cumulus::{Client, ClientConfig, Error, GridRequest};

const LOG_ENV: &str = "CUMULUS_LOG";

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                eprintln!("error::{}", err.to_string().trim_end());
                process::exit(1);
            }
        },
    };

    init_tracing();

    if let Err(err) = run(cli) {
        eprintln!("error::{err:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "cumulus",
    version,
    about = "Extract grids and timeseries from the Cumulus watershed data service",
    long_about = "Extract grids and timeseries from the Cumulus watershed data service.\n\n\
                  Options may also be piped in as a JSON document on stdin \
                  (e.g. {\"Host\": \"...\", \"Slug\": \"...\", \"Products\": [...]}); \
                  stdin values override command-line flags."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    flags: Flags,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Submit a grid extraction job, wait for it and download the DSS file.
    Grid,
    /// Stream line-delimited JSON from a watershed extract endpoint.
    Extract,
    /// GET an endpoint and print the response.
    Get,
}

impl From<Command> for Mode {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Grid => Mode::Grid,
            Command::Extract => Mode::Extract,
            Command::Get => Mode::Get,
        }
    }
}

#[derive(Args, Debug, Default)]
struct Flags {
    /// URL scheme [default: https]
    #[arg(long, global = true, env = "CUMULUS_SCHEME")]
    scheme: Option<String>,

    /// Service host, optionally with port [default: localhost]
    #[arg(long, global = true, env = "CUMULUS_HOST")]
    host: Option<String>,

    /// Bearer token for job submission
    #[arg(long, global = true, env = "CUMULUS_AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// Watershed slug
    #[arg(long, global = true, visible_alias = "id")]
    slug: Option<String>,

    /// Product slug; repeat for several products
    #[arg(long = "product", global = true, value_name = "PRODUCT")]
    products: Vec<String>,

    /// Start of the time window, RFC3339 [default: now - 7 days]
    #[arg(long, global = true)]
    after: Option<String>,

    /// End of the time window, RFC3339 [default: now]
    #[arg(long, global = true)]
    before: Option<String>,

    /// Grid job timeout in seconds [default: 300]
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Output file (extract/get)
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Echo the response to stdout (extract/get)
    #[arg(long, global = true)]
    stdout: bool,

    /// Endpoint path relative to the service root (get; overrides the extract path)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Directory downloaded DSS files are written to [default: system temp dir]
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// rc file to read instead of CUMULUS_RC / ./.cumulusrc / ~/.cumulusrc
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Additional host to allow; repeatable
    #[arg(long = "allow-host", global = true, value_name = "HOST")]
    allow_hosts: Vec<String>,
}

impl Flags {
    fn to_layer(&self, mode: Option<Mode>) -> ConfigLayer {
        ConfigLayer {
            mode,
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            auth: self.auth.clone(),
            slug: self.slug.clone(),
            products: (!self.products.is_empty()).then(|| self.products.clone()),
            after: self.after.clone(),
            before: self.before.clone(),
            stdout: self.stdout.then_some(true),
            out: self.out.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            verify: self.insecure.then_some(false),
            dir: self.dir.clone(),
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let rc = config::load_rc_layer(cli.flags.config.as_deref())?;
    let mut layer = rc.merge(cli.flags.to_layer(cli.command.map(Mode::from)));
    if let Some(stdin) = read_stdin_layer()? {
        layer = layer.merge(stdin);
    }

    let opts = Options::resolve(layer, Utc::now())?;
    let mode = opts
        .mode
        .ok_or_else(|| anyhow!("no subcommand provided; expecting 'grid', 'extract' or 'get'"))?;
    tracing::debug!(scheme = %opts.scheme, host = %opts.host, %mode, "resolved options");

    HostAllowlist::default()
        .with_hosts(&cli.flags.allow_hosts)
        .check(&opts.host)?;

    let base_url = opts.base_url()?;
    let client = Client::new(
        ClientConfig::new(base_url.clone())
            .with_token(opts.auth.clone().unwrap_or_default())
            .with_verify(opts.verify),
    )?
    .with_download_dir(opts.dir.clone())
    .with_progress(io::stderr().is_terminal());

    client.check_service()?;
    tracing::info!(url = %base_url, "service up");

    tracing::info!("initiating '{mode}' command");
    match mode {
        Mode::Grid => run_grid(&client, &opts),
        Mode::Extract => run_extract(&client, &opts),
        Mode::Get => run_get(&client, &opts),
    }
}

/// Reads a JSON options document from stdin when stdin is piped.
fn read_stdin_layer() -> Result<Option<ConfigLayer>> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut data = Vec::new();
    stdin
        .read_to_end(&mut data)
        .context("failed to read stdin")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let layer = ConfigLayer::from_json(&data).context("invalid JSON options on stdin")?;
    Ok(Some(layer))
}

fn run_grid(client: &Client, opts: &Options) -> Result<()> {
    let slug = opts.require_slug()?;
    if opts.products.is_empty() {
        return Err(Error::MissingOption("product").into());
    }

    let req = GridRequest::new(slug, opts.products.clone(), opts.after, opts.before)
        .with_timeout(opts.timeout);
    let artifact = cumulus::grid(client, &req)?;

    let mut stdout = io::stdout().lock();
    write!(stdout, "{artifact}")?;
    stdout.flush()?;
    Ok(())
}

fn run_extract(client: &Client, opts: &Options) -> Result<()> {
    let mut req = match &opts.endpoint {
        Some(endpoint) => ExtractRequest {
            endpoint: endpoint.clone(),
            after: opts.after,
            before: opts.before,
            out: None,
        },
        None => ExtractRequest::for_watershed(opts.require_slug()?, opts.after, opts.before),
    };
    req = req.with_out(opts.out.clone());

    let mut stdout = io::stdout().lock();
    let echo: Option<&mut dyn Write> = if opts.stdout { Some(&mut stdout) } else { None };
    let summary = extract::extract(client, &req, echo)?;
    tracing::info!(lines = summary.lines, bytes = summary.bytes, "extract complete");
    Ok(())
}

fn run_get(client: &Client, opts: &Options) -> Result<()> {
    let endpoint = opts
        .endpoint
        .as_deref()
        .ok_or(Error::MissingOption("endpoint"))?;

    let mut stdout = io::stdout().lock();
    let echo: Option<&mut dyn Write> = if opts.stdout { Some(&mut stdout) } else { None };
    let bytes = extract::get(client, endpoint, echo, opts.out.as_deref())?;
    tracing::debug!(bytes, "get complete");
    Ok(())
}
