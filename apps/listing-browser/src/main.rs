use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use listing_client::{
    normalize_path, Collaborators, ListingClient, ListingPhase, ListingState, WsConnector,
};
use listing_proto::{ObjectEntry, RequestId};
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

mod cli;
mod surface;
mod telemetry;

use cli::{BrowseConfig, Cli};
use surface::TerminalSurface;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init()?;
    let config = BrowseConfig::try_from(Cli::parse())?;

    let surface = TerminalSurface::new();
    let connector = Arc::new(WsConnector::from_config(&config.client));
    let client = ListingClient::spawn(
        &config.client,
        connector,
        Collaborators::new(surface.clone(), surface.clone()),
    )
    .context("failed to start listing engine")?;

    let result = browse(&client, &config, &surface).await;
    client.teardown().await;
    result
}

async fn browse(
    client: &ListingClient,
    config: &BrowseConfig,
    surface: &TerminalSurface,
) -> Result<()> {
    client.set_allowed_resources(config.allow_list.clone())?;
    client.set_show_deleted(config.show_deleted)?;
    if let Some(date) = config.rewind_at {
        client.set_rewind(config.bucket.as_str(), true, Some(date))?;
    }

    let mut printed = None;
    for path in &config.paths {
        let prefix = normalize_path(path);
        if printed.is_some() && client.state().read(|s| s.current_path == prefix) {
            continue;
        }
        client.navigate(config.bucket.as_str(), path.as_str())?;

        let listed = client.state().wait_for(config.timeout, |s| {
            s.phase.is_terminal() && s.current_bucket == config.bucket && s.current_path == prefix
        });
        let state = tokio::select! {
            state = listed => state.with_context(|| format!("listing {prefix:?} did not finish"))?,
            _ = surface.session_expired() => bail!("session expired; sign in again"),
        };
        printed = print_listing(&state, config)?;
    }

    let Some(interval) = config.watch else {
        return Ok(());
    };

    info!(
        bucket = %config.bucket,
        every_secs = interval.as_secs(),
        "watching listing; press ctrl-c to stop"
    );
    let mut changes = client.state().subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut reported_loss = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => client.refresh()?,
            changed = changes.changed() => {
                changed.map_err(|_| anyhow!("listing engine stopped"))?;
                let state = client.state().snapshot();
                if state.connection_error != reported_loss {
                    reported_loss = state.connection_error;
                    if reported_loss {
                        warn!("connection to console lost; reconnecting");
                    }
                }
                if state.phase.is_terminal() && state.phase.request_id() != printed {
                    printed = print_listing(&state, config)?;
                }
            }
            _ = surface.session_expired() => bail!("session expired; sign in again"),
            _ = signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_listing(state: &ListingState, config: &BrowseConfig) -> Result<Option<RequestId>> {
    if let ListingPhase::Failed { failure, .. } = state.phase {
        bail!(
            "listing {}/{} failed: {failure:?}",
            state.current_bucket,
            state.current_path
        );
    }

    let mut view = state.clone();
    view.search = config.search.clone().unwrap_or_default();
    let records = view.visible_records();
    if config.json {
        let listing = json!({
            "bucket": state.current_bucket,
            "prefix": state.current_path,
            "entries": records,
        });
        println!("{}", serde_json::to_string(&listing)?);
    } else {
        println!(
            "{}/{} ({} entries)",
            state.current_bucket,
            state.current_path,
            records.len()
        );
        for entry in records {
            println!("{}", format_entry(entry));
        }
    }
    Ok(state.phase.request_id())
}

fn format_entry(entry: &ObjectEntry) -> String {
    if entry.is_prefix() {
        return format!("{:>25} {:>12} {}", "", "PRE", entry.name);
    }
    let marker = if entry.delete_flag { " (deleted)" } else { "" };
    format!(
        "{:>25} {:>12} {}{marker}",
        entry.last_modified, entry.size, entry.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_and_delete_markers_are_labelled() {
        let folder = ObjectEntry::named("2024/");
        assert!(format_entry(&folder).ends_with("PRE 2024/"));

        let gone = ObjectEntry {
            size: 12,
            delete_flag: true,
            ..ObjectEntry::named("old.txt")
        };
        assert!(format_entry(&gone).ends_with("12 old.txt (deleted)"));
    }
}
