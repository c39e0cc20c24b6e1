//! Starting Chromium and locating its DevTools page target.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::error::CdpError;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A browser process started by [`launch_chromium`].
#[derive(Debug)]
pub struct LaunchedBrowser {
    pub child: Child,
    /// DevTools WebSocket URL of the first page.
    pub ws_url: String,
}

/// One entry of the DevTools `/json` target list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    web_socket_debugger_url: Option<String>,
}

/// Start a visible Chromium at `path` with DevTools on `port` and wait for
/// its first page target.
///
/// The browser gets its own profile directory under the system temp dir. It
/// keeps running if the returned [`Child`] is dropped.
///
/// # Errors
///
/// [`CdpError::Launch`] if the process cannot be started or exits early,
/// otherwise the last discovery error once [`LAUNCH_TIMEOUT`] runs out.
pub async fn launch_chromium(path: &Path, port: u16) -> Result<LaunchedBrowser, CdpError> {
    let profile = std::env::temp_dir().join(format!("dtscan-chromium-{port}"));
    let launch_error = |source| CdpError::Launch {
        path: path.display().to_string(),
        source,
    };

    let mut child = Command::new(path)
        .arg(format!("--remote-debugging-port={port}"))
        .arg(format!("--user-data-dir={}", profile.display()))
        .args(["--no-first-run", "--no-default-browser-check", "about:blank"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(launch_error)?;
    tracing::info!(path = %path.display(), port, "launched browser");

    let http = discovery_client()?;
    let base_url = format!("http://127.0.0.1:{port}");
    let deadline = Instant::now() + LAUNCH_TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().map_err(launch_error)? {
            return Err(launch_error(std::io::Error::other(format!(
                "browser exited during startup with {status}"
            ))));
        }
        match discover_page_target(&http, &base_url).await {
            Ok(ws_url) => return Ok(LaunchedBrowser { child, ws_url }),
            Err(err) if Instant::now() < deadline => {
                tracing::trace!(error = %err, "DevTools not ready yet");
                tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
            }
            Err(err) => {
                if let Err(kill_err) = child.start_kill() {
                    tracing::debug!(error = %kill_err, "failed to stop browser");
                }
                return Err(err);
            }
        }
    }
}

/// WebSocket URL of the first page target listed at `{base_url}/json`.
///
/// # Errors
///
/// [`CdpError::Http`] if the list cannot be fetched or decoded,
/// [`CdpError::NoPageTarget`] if it has no attachable page.
pub async fn discover_page_target(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<String, CdpError> {
    let url = format!("{}/json", base_url.trim_end_matches('/'));
    let targets: Vec<TargetInfo> = http
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    targets
        .into_iter()
        .filter(|target| target.kind == "page")
        .find_map(|target| {
            tracing::debug!(page = %target.url, "found page target");
            target.web_socket_debugger_url
        })
        .ok_or(CdpError::NoPageTarget { url })
}

/// Accept either a page WebSocket URL or the browser's HTTP DevTools
/// address (e.g. `http://127.0.0.1:9222`) and return a page WebSocket URL.
///
/// # Errors
///
/// See [`discover_page_target`].
pub async fn resolve_ws_url(devtools_url: &str) -> Result<String, CdpError> {
    if devtools_url.starts_with("ws://") || devtools_url.starts_with("wss://") {
        return Ok(devtools_url.to_string());
    }
    discover_page_target(&discovery_client()?, devtools_url).await
}

fn discovery_client() -> Result<reqwest::Client, CdpError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_list_entry_deserializes() {
        let target: TargetInfo = serde_json::from_value(serde_json::json!({
            "description": "",
            "id": "A1B2",
            "title": "about:blank",
            "type": "page",
            "url": "about:blank",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A1B2"
        }))
        .unwrap();
        assert_eq!(target.kind, "page");
        assert_eq!(
            target.web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A1B2")
        );
    }

    #[tokio::test]
    async fn websocket_urls_pass_through() {
        let url = "ws://127.0.0.1:9222/devtools/page/A1B2";
        assert_eq!(resolve_ws_url(url).await.unwrap(), url);
    }
}
