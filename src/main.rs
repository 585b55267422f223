//! stallguard command line client.
//!
//! Sends one request and streams the response body to stdout. Stalls are
//! reported with the phase they happened in.
//!
//! ```text
//! stallguard [-X METHOD] URL [-H 'Name: value']... [-d DATA | --json JSON |
//!            -F key=value... [--file PATH]... | --upload PATH]
//!            [--timeout-ms N] [--deadline-ms N] [--host-ip IP] [-c config.toml]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use http::Method;
use tokio::io::AsyncWriteExt;

use stallguard::body::{self, FilePart, MultipartBody};
use stallguard::config::{load_config, ClientConfig};
use stallguard::observability::logging::init_logging;
use stallguard::{Client, ClientOptions, Request};

#[derive(Parser)]
#[command(name = "stallguard")]
#[command(about = "HTTP client that fails fast on stalled transfers", version)]
struct Cli {
    /// Target URL (http only)
    url: String,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra header, `Name: value`
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Raw request body
    #[arg(short, long, conflicts_with_all = ["json", "upload"])]
    data: Option<String>,

    /// JSON request body
    #[arg(long, conflicts_with = "upload")]
    json: Option<String>,

    /// Form field, `key=value`; sent multipart when files are given
    #[arg(short = 'F', long = "form", value_name = "KEY=VALUE")]
    fields: Vec<String>,

    /// File part of a multipart upload
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Send this file as the raw body
    #[arg(long)]
    upload: Option<PathBuf>,

    /// Inactivity timeout in milliseconds, 0 disables it
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Overall deadline in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Connect to this IP instead of resolving the URL host
    #[arg(long)]
    host_ip: Option<String>,

    /// Do not follow redirects
    #[arg(long)]
    no_redirect: bool,

    /// Print the response head before the body
    #[arg(short, long)]
    include: bool,

    /// Log the exchange to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Client configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);

    let client = Client::new(ClientOptions::from(&config));
    let mut request = build_request(&cli).await?;

    tracing::info!(method = %request.method, url = %request.url, "Sending request");
    let mut response = match client.send(&mut request).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("stallguard: {e}");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprint!("{}", response.dump_request());
    }

    let mut stdout = tokio::io::stdout();
    if cli.include {
        stdout.write_all(response.dump_head().as_bytes()).await?;
    }
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => stdout.write_all(&chunk).await?,
            Ok(None) => break,
            Err(e) => {
                stdout.flush().await?;
                eprintln!("stallguard: {e}");
                std::process::exit(1);
            }
        }
    }
    stdout.flush().await?;

    if !response.ok() {
        tracing::warn!(status = %response.status(), "Non-success status");
    }
    Ok(())
}

async fn build_request(cli: &Cli) -> Result<Request, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())?;
    let mut request = Request::new(method, cli.url.clone());

    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header {header:?} is not `Name: value`"))?;
        request = request.header(name.trim(), value.trim());
    }

    let fields = cli
        .fields
        .iter()
        .map(|field| {
            field
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("form field {field:?} is not `key=value`"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !cli.files.is_empty() {
        let mut multipart = MultipartBody::new().fields(fields);
        for path in &cli.files {
            multipart = multipart.file(FilePart::from_path(path).await?);
        }
        request = request.body(multipart);
    } else if !fields.is_empty() {
        request = request.body(body::form(fields));
    } else if let Some(json) = &cli.json {
        request = request.body(body::json_string(json.clone()));
    } else if let Some(data) = &cli.data {
        request = request.body(body::string(data.clone()));
    } else if let Some(path) = &cli.upload {
        request = request.body(body::file(path));
    }

    if let Some(ms) = cli.timeout_ms {
        request = request.timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.deadline_ms {
        request = request.request_timeout(Duration::from_millis(ms));
    }
    if let Some(ip) = &cli.host_ip {
        request = request.host_ip(ip.clone());
    }
    if cli.no_redirect {
        request = request.disable_redirect();
    }

    Ok(request)
}
