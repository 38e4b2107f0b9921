//! Keeps overlay browser sources pointed at the selected event
//!
//! An overlay is event-bound when its URL path reads `/event/<code>/...`.
//! Rewriting swaps the host and the `<code>` segment and nothing else.
//!
//! Sources are visited one at a time under a single session guard, so a fetch
//! issued after an update sees every rewritten URL.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::connection::{ConnectionManager, NotConnected};
use crate::constants::overlay::{EVENT_SEGMENT, INPUT_KIND, URL_SETTING};
use crate::obs::RequestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    NotConnected(#[from] NotConnected),

    #[error("'{0}' is not a usable host")]
    InvalidHost(String),

    #[error("'{0}' is not a usable event code")]
    InvalidEventCode(String),

    #[error("listing browser sources failed: {0}")]
    Request(#[from] RequestError),
}

/// One source the batch update could not finish
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub name: String,
    pub error: String,
}

/// Per-source outcome of `update_event_code`
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    /// Rewritten and pushed
    pub updated: Vec<BrowserSource>,
    /// Not event-bound, left alone
    pub unchanged: Vec<String>,
    pub failed: Vec<SourceFailure>,
}

impl UpdateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Host (and optional port) to point overlays at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHost {
    host: String,
    port: Option<u16>,
}

impl TargetHost {
    /// Accepts `host` or `host:port`; rejects anything a URL can't carry
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(['/', '?', '#', '@']) {
            return None;
        }
        let parsed = Url::parse(&format!("http://{raw}/")).ok()?;
        let host = parsed.host_str()?.to_string();
        // `Url::port` hides an explicit :80, so read the port off the input
        let port = raw.rsplit_once(':').and_then(|(_, port)| port.parse().ok());
        Some(Self { host, port })
    }
}

/// Codes that would vanish or climb a level once written as a path segment
fn is_usable_event_code(code: &str) -> bool {
    !matches!(code.trim(), "" | "." | "..")
}

/// Parse `raw` and return it if it follows the `/event/<code>` convention
pub fn event_bound(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    let is_bound = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .is_some_and(|first| first == EVENT_SEGMENT);
    is_bound.then_some(url)
}

/// Point an event-bound URL at `target` and `event_code`
///
/// Only the host (and port, when `target` names one) and path segment 2
/// change; scheme, other segments, query and fragment are kept.
pub fn rewrite(url: &Url, target: &TargetHost, event_code: &str) -> Option<Url> {
    let mut url = url.clone();
    url.set_host(Some(&target.host)).ok()?;
    if let Some(port) = target.port {
        url.set_port(Some(port)).ok()?;
    }

    let code = encode_segment(event_code)?;
    // Segments come back already encoded; rejoin them as-is
    let mut segments: Vec<String> = url.path_segments()?.map(str::to_string).collect();
    match segments.get_mut(1) {
        Some(slot) => *slot = code,
        None => segments.push(code),
    }
    url.set_path(&format!("/{}", segments.join("/")));
    Some(url)
}

/// Percent-encode `raw` as a single path segment
fn encode_segment(raw: &str) -> Option<String> {
    let mut scratch = Url::parse("http://localhost/").ok()?;
    scratch.path_segments_mut().ok()?.clear().push(raw);
    Some(scratch.path().trim_start_matches('/').to_string())
}

fn url_setting(settings: &Map<String, Value>) -> Option<&str> {
    settings.get(URL_SETTING).and_then(Value::as_str)
}

pub struct BrowserSourceSynchronizer {
    connection: Arc<ConnectionManager>,
}

impl BrowserSourceSynchronizer {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Event-bound browser sources, in the tool's order
    pub async fn fetch_browser_sources(&self) -> Result<Vec<BrowserSource>, SyncError> {
        let session = self.connection.acquire().await?;
        let mut sources = Vec::new();

        for name in session.list_inputs(INPUT_KIND).await? {
            let settings = session.get_input_settings(&name).await?;
            match url_setting(&settings) {
                Some(url) if event_bound(url).is_some() => sources.push(BrowserSource {
                    name,
                    url: url.to_string(),
                }),
                url => debug!(source = %name, url = ?url, "Source is not event-bound"),
            }
        }

        info!(count = sources.len(), "Fetched event-bound browser sources");
        Ok(sources)
    }

    /// Point every event-bound source at `target_host` and `event_code`
    ///
    /// A failing source is recorded in the report and the batch moves on.
    pub async fn update_event_code(&self, target_host: &str, event_code: &str) -> Result<UpdateReport, SyncError> {
        let target = TargetHost::parse(target_host).ok_or_else(|| SyncError::InvalidHost(target_host.to_string()))?;
        if !is_usable_event_code(event_code) {
            return Err(SyncError::InvalidEventCode(event_code.to_string()));
        }
        let session = self.connection.acquire().await?;
        info!(host = %target_host, event_code = %event_code, "Updating browser sources");

        let mut report = UpdateReport::default();
        for name in session.list_inputs(INPUT_KIND).await? {
            let settings = match session.get_input_settings(&name).await {
                Ok(settings) => settings,
                Err(e) => {
                    error!(source = %name, error = %e, "Failed to read source settings");
                    report.failed.push(SourceFailure { name, error: e.to_string() });
                    continue;
                }
            };

            let Some(current) = url_setting(&settings).and_then(event_bound) else {
                debug!(source = %name, url = ?url_setting(&settings), "Path does not match filter");
                report.unchanged.push(name);
                continue;
            };
            let Some(url) = rewrite(&current, &target, event_code) else {
                error!(source = %name, url = %current, host = %target_host, "Cannot rewrite URL for target");
                report.failed.push(SourceFailure {
                    name,
                    error: format!("cannot rewrite URL {current} for target {target_host}"),
                });
                continue;
            };

            let mut patch = Map::new();
            patch.insert(URL_SETTING.to_string(), Value::String(url.to_string()));
            match session.set_input_settings(&name, patch, true).await {
                Ok(()) => {
                    info!(source = %name, url = %url, "Updated source");
                    report.updated.push(BrowserSource { name, url: url.into() });
                }
                Err(e) => {
                    error!(source = %name, error = %e, "Failed to update source");
                    report.failed.push(SourceFailure { name, error: e.to_string() });
                }
            }
        }

        Ok(report)
    }
}
