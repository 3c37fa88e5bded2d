//! Chrome DevTools Protocol driver.
//!
//! Launches Chrome with a persistent profile and a remote-debugging port,
//! attaches to the first page target over WebSocket, and implements
//! `BrowserDriver` with DOM/Runtime/Input commands. Elements are remote
//! object ids in a single object group that is released between scans.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use xzero_core::{Error, Result};

use crate::config::BrowserConfig;
use crate::driver::BrowserDriver;
use crate::types::ElementHandle;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OBJECT_GROUP: &str = "xzero";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Chat web apps refuse the default headless user agent.
const HEADLESS_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

const FETCH_AUDIO_JS: &str = r#"async function() {
    const media = this.tagName === 'AUDIO' ? this : this.querySelector('audio');
    const src = media ? (media.currentSrc || media.src) : null;
    if (!src) return null;
    const response = await fetch(src);
    const bytes = new Uint8Array(await response.arrayBuffer());
    let binary = '';
    for (let i = 0; i < bytes.length; i += 0x8000) {
        binary += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
    }
    return btoa(binary);
}"#;

const CLEAR_JS: &str = r#"function() {
    this.focus();
    if (this.isContentEditable) {
        const range = document.createRange();
        range.selectNodeContents(this);
        const selection = window.getSelection();
        selection.removeAllRanges();
        selection.addRange(range);
        document.execCommand('delete');
    } else if ('value' in this) {
        this.value = '';
        this.dispatchEvent(new Event('input', { bubbles: true }));
    }
}"#;

/// DevTools-backed browser session.
pub struct CdpDriver {
    ws: WsStream,
    next_id: u64,
    chrome: Option<Child>,
}

impl CdpDriver {
    /// Launch Chrome on `profile_dir` and attach to its page.
    pub async fn launch(config: &BrowserConfig, profile_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(profile_dir)?;
        clear_stale_lock(profile_dir);

        let binary = resolve_chrome_binary(config.chrome_binary.as_deref()).ok_or_else(|| {
            Error::Browser("no Chrome/Chromium executable found; set XZERO_CHROME".into())
        })?;

        let mut chrome = Command::new(&binary)
            .args(chrome_args(config, profile_dir))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("failed to launch {}: {}", binary.display(), e)))?;

        info!(
            "Launched {} (pid {:?}, headed: {}, port {})",
            binary.display(),
            chrome.id(),
            config.headed,
            config.debugging_port
        );

        let ws_url = discover_page_target(&mut chrome, config.debugging_port).await?;
        let (ws, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| Error::Browser(format!("DevTools connect failed: {}", e)))?;
        debug!("Attached to page target {}", ws_url);

        Ok(Self {
            ws,
            next_id: 0,
            chrome: Some(chrome),
        })
    }

    /// Send one DevTools command and wait for its response. Events that
    /// arrive in between are discarded.
    async fn command(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;

        self.ws
            .send(Message::Text(encode_command(id, method, params)))
            .await
            .map_err(|e| Error::Browser(format!("{}: send failed: {}", method, e)))?;

        let ws = &mut self.ws;
        let wait = async move {
            while let Some(frame) = ws.next().await {
                let frame = frame.map_err(|e| Error::Browser(format!("{}: {}", method, e)))?;
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                if let Some(outcome) = match_response(&text, id) {
                    return outcome.map_err(|e| Error::Browser(format!("{}: {}", method, e)));
                }
            }
            Err(Error::Browser("DevTools connection closed".into()))
        };

        tokio::time::timeout(COMMAND_TIMEOUT, wait)
            .await
            .map_err(|_| Error::Timeout(format!("{} got no response", method)))?
    }

    /// Evaluate `expression` in the page, returning the result object.
    async fn evaluate(&mut self, expression: String) -> Result<Value> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "objectGroup": OBJECT_GROUP,
                    "returnByValue": false,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result["result"].clone())
    }

    /// Call `function` with `this` bound to `element`.
    async fn call_on(
        &mut self,
        element: &ElementHandle,
        function: &str,
        args: Vec<Value>,
        by_value: bool,
    ) -> Result<Value> {
        let arguments: Vec<Value> = args.into_iter().map(|a| json!({ "value": a })).collect();
        let result = self
            .command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": element.object_id(),
                    "functionDeclaration": function,
                    "arguments": arguments,
                    "objectGroup": OBJECT_GROUP,
                    "returnByValue": by_value,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result["result"].clone())
    }

    async fn focus(&mut self, element: &ElementHandle) -> Result<()> {
        self.call_on(element, "function() { this.focus(); }", vec![], true)
            .await
            .map(|_| ())
    }

    /// Expand a remote array of nodes into element handles.
    async fn element_array(&mut self, array: Value) -> Result<Vec<ElementHandle>> {
        let Some(array_id) = array["objectId"].as_str().map(str::to_string) else {
            return Ok(Vec::new());
        };
        let props = self
            .command(
                "Runtime.getProperties",
                json!({ "objectId": array_id, "ownProperties": true }),
            )
            .await?;
        let elements = indexed_elements(&props);

        if let Err(e) = self
            .command("Runtime.releaseObject", json!({ "objectId": array_id }))
            .await
        {
            debug!("releaseObject failed: {}", e);
        }
        Ok(elements)
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let result = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(Error::Browser(format!("navigation to {} failed: {}", url, error)));
        }
        info!("Navigated to {}", url);
        Ok(())
    }

    async fn find_elements(&mut self, selector: &str) -> Result<Vec<ElementHandle>> {
        let expression = format!(
            "Array.from(document.querySelectorAll({}))",
            serde_json::to_string(selector)?
        );
        let array = self.evaluate(expression).await?;
        self.element_array(array).await
    }

    async fn find_within(
        &mut self,
        element: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let array = self
            .call_on(
                element,
                "function(selector) { return Array.from(this.querySelectorAll(selector)); }",
                vec![json!(selector)],
                false,
            )
            .await?;
        self.element_array(array).await
    }

    async fn ancestor(&mut self, element: &ElementHandle, levels: u32) -> Result<ElementHandle> {
        let node = self
            .call_on(
                element,
                "function(levels) { let n = this; for (let i = 0; i < levels && n; i++) { n = n.parentElement; } return n; }",
                vec![json!(levels)],
                false,
            )
            .await?;
        remote_handle(&node)
            .ok_or_else(|| Error::ElementNotFound(format!("no ancestor {} levels up", levels)))
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.call_on(
            element,
            "function() { this.scrollIntoView({ block: 'center' }); this.click(); }",
            vec![],
            true,
        )
        .await
        .map(|_| ())
    }

    async fn clear(&mut self, element: &ElementHandle) -> Result<()> {
        self.call_on(element, CLEAR_JS, vec![], true).await.map(|_| ())
    }

    async fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<()> {
        self.focus(element).await?;
        self.command("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn press_enter(&mut self, element: &ElementHandle) -> Result<()> {
        self.focus(element).await?;
        for event_type in ["keyDown", "keyUp"] {
            self.command(
                "Input.dispatchKeyEvent",
                json!({
                    "type": event_type,
                    "key": "Enter",
                    "code": "Enter",
                    "windowsVirtualKeyCode": 13,
                    "nativeVirtualKeyCode": 13,
                    "text": "\r",
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn get_text(&mut self, element: &ElementHandle) -> Result<String> {
        let value = self
            .call_on(
                element,
                "function() { return this.innerText || this.textContent || ''; }",
                vec![],
                true,
            )
            .await?;
        Ok(value["value"].as_str().unwrap_or_default().to_string())
    }

    async fn get_attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>> {
        let value = self
            .call_on(
                element,
                "function(name) { return this.getAttribute(name); }",
                vec![json!(name)],
                true,
            )
            .await?;
        Ok(value["value"].as_str().map(str::to_string))
    }

    async fn set_file_input(&mut self, element: &ElementHandle, path: &Path) -> Result<()> {
        let absolute = std::fs::canonicalize(path)?;
        self.command(
            "DOM.setFileInputFiles",
            json!({
                "files": [absolute.to_string_lossy()],
                "objectId": element.object_id(),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_audio(&mut self, element: &ElementHandle) -> Result<Vec<u8>> {
        let value = self.call_on(element, FETCH_AUDIO_JS, vec![], true).await?;
        let encoded = value["value"]
            .as_str()
            .ok_or_else(|| Error::ElementNotFound("message has no audio source".into()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Browser(format!("audio payload is not base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(Error::Browser("audio source was empty".into()));
        }
        Ok(bytes)
    }

    async fn release_handles(&mut self) -> Result<()> {
        self.command(
            "Runtime.releaseObjectGroup",
            json!({ "objectGroup": OBJECT_GROUP }),
        )
        .await
        .map(|_| ())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut chrome) = self.chrome.take() else {
            return Ok(());
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.command("Browser.close", json!({})))
            .await
            .is_err()
        {
            debug!("Browser.close timed out");
        }
        let _ = self.ws.close(None).await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, chrome.wait()).await {
            Ok(Ok(status)) => info!("Chrome exited ({})", status),
            _ => {
                warn!("Chrome did not exit, killing it");
                chrome.kill().await?;
            }
        }
        Ok(())
    }
}

/// Command-line flags for a Chrome instance driven over DevTools.
fn chrome_args(config: &BrowserConfig, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", config.debugging_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--password-store=basic".to_string(),
        "--disable-session-crashed-bubble".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--window-size=1280,800".to_string(),
    ];
    if !config.headed {
        args.push("--headless=new".to_string());
        args.push(format!("--user-agent={}", HEADLESS_USER_AGENT));
    }
    args.push("about:blank".to_string());
    args
}

/// A crashed session leaves a `SingletonLock` symlink that makes the next
/// launch hand off to a process that no longer exists.
fn clear_stale_lock(profile_dir: &Path) {
    let lock = profile_dir.join("SingletonLock");
    if std::fs::symlink_metadata(&lock).is_ok() {
        match std::fs::remove_file(&lock) {
            Ok(()) => info!("Removed stale browser lock {}", lock.display()),
            Err(e) => warn!("Failed to remove browser lock {}: {}", lock.display(), e),
        }
    }
}

fn resolve_chrome_binary(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(binary) = explicit {
        return Some(PathBuf::from(binary));
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        CHROME_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Poll the DevTools HTTP endpoint until a page target is available.
async fn discover_page_target(chrome: &mut Child, port: u16) -> Result<String> {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;

    loop {
        if let Some(status) = chrome.try_wait()? {
            return Err(Error::Browser(format!("Chrome exited during startup ({})", status)));
        }

        if let Ok(response) = client.get(&url).send().await {
            if let Ok(targets) = response.json::<Value>().await {
                if let Some(ws_url) = pick_page_target(&targets) {
                    return Ok(ws_url);
                }
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "DevTools endpoint on port {} did not come up",
                port
            )));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn pick_page_target(targets: &Value) -> Option<String> {
    targets.as_array()?.iter().find_map(|target| {
        if target["type"].as_str() != Some("page") {
            return None;
        }
        target["webSocketDebuggerUrl"].as_str().map(str::to_string)
    })
}

fn encode_command(id: u64, method: &str, params: Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

/// `Some` when `raw` is the response to command `id`.
fn match_response(raw: &str, id: u64) -> Option<std::result::Result<Value, String>> {
    let frame: Value = serde_json::from_str(raw).ok()?;
    if frame["id"].as_u64() != Some(id) {
        return None;
    }
    if let Some(error) = frame.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Some(Err(message.to_string()));
    }
    Some(Ok(frame.get("result").cloned().unwrap_or(Value::Null)))
}

fn check_exception(result: &Value) -> Result<()> {
    match result.get("exceptionDetails") {
        Some(details) => {
            let description = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("script threw");
            Err(Error::Browser(description.to_string()))
        }
        None => Ok(()),
    }
}

/// Handle for a remote object, `None` for null results.
fn remote_handle(object: &Value) -> Option<ElementHandle> {
    if object["subtype"].as_str() == Some("null") {
        return None;
    }
    object["objectId"]
        .as_str()
        .map(|id| ElementHandle(id.to_string()))
}

/// Array elements from a `Runtime.getProperties` result, in index order.
fn indexed_elements(props: &Value) -> Vec<ElementHandle> {
    let mut indexed: Vec<(usize, ElementHandle)> = props["result"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let index = entry["name"].as_str()?.parse::<usize>().ok()?;
                    let handle = remote_handle(&entry["value"])?;
                    Some((index, handle))
                })
                .collect()
        })
        .unwrap_or_default();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, handle)| handle).collect()
}
