use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use listing_client::{config::DEFAULT_ORIGIN, ClientConfig};
use listing_proto::PermissionResource;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "listing-browser",
    author,
    version,
    about = "List bucket contents through the console's object-listing websocket"
)]
pub struct Cli {
    /// Bucket to list.
    pub bucket: String,

    /// Folders or object paths inside the bucket, listed in order; objects
    /// list their folder.
    #[arg(default_value = "")]
    pub paths: Vec<String>,

    /// Origin the console is served from.
    #[arg(long, env = "LISTING_CONSOLE_ORIGIN", default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    /// Base path the console is mounted under.
    #[arg(long, env = "LISTING_BASE_PATH", default_value = "/")]
    pub base_path: String,

    /// Session token sent as the `token` cookie.
    #[arg(long, env = "LISTING_SESSION_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Browse without a session.
    #[arg(long, env = "LISTING_ANONYMOUS", default_value_t = false)]
    pub anonymous: bool,

    /// List the bucket as it was at this RFC 3339 timestamp.
    #[arg(long)]
    pub rewind_at: Option<String>,

    /// Include objects whose latest version is a delete marker.
    #[arg(long, default_value_t = false)]
    pub show_deleted: bool,

    /// Only print entries whose name contains this text (case-insensitive).
    #[arg(long)]
    pub search: Option<String>,

    /// JSON file with the session's allow-list (`allowResources`).
    #[arg(long)]
    pub allow_list: Option<PathBuf>,

    /// Print listings as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Keep the socket open and re-list every SECS seconds.
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,

    /// How long to wait for a listing to finish.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BrowseConfig {
    pub client: ClientConfig,
    pub bucket: String,
    pub paths: Vec<String>,
    pub rewind_at: Option<OffsetDateTime>,
    pub show_deleted: bool,
    pub search: Option<String>,
    pub allow_list: Vec<PermissionResource>,
    pub json: bool,
    pub watch: Option<Duration>,
    pub timeout: Duration,
}

impl TryFrom<Cli> for BrowseConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let origin = Url::parse(&cli.origin.replacen("://localhost", "://127.0.0.1", 1))
            .with_context(|| format!("invalid console origin: {}", cli.origin))?;
        let mut client = ClientConfig::new(origin).with_base_path(cli.base_path);
        client.session_token = cli.token.filter(|token| !token.is_empty());
        client.anonymous = cli.anonymous;

        let rewind_at = cli
            .rewind_at
            .as_deref()
            .map(|value| {
                OffsetDateTime::parse(value, &Rfc3339)
                    .with_context(|| format!("invalid rewind timestamp: {value}"))
            })
            .transpose()?;

        let allow_list = match &cli.allow_list {
            Some(path) => load_allow_list(path)?,
            None => Vec::new(),
        };

        Ok(BrowseConfig {
            client,
            bucket: cli.bucket,
            paths: cli.paths,
            rewind_at,
            show_deleted: cli.show_deleted,
            search: cli.search.filter(|s| !s.is_empty()),
            allow_list,
            json: cli.json,
            watch: cli.watch.filter(|secs| *secs > 0).map(Duration::from_secs),
            timeout: Duration::from_secs(cli.timeout_secs),
        })
    }
}

fn load_allow_list(path: &Path) -> Result<Vec<PermissionResource>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read allow-list {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse allow-list {}", path.display()))
}
