// src/services/portal/chromium.rs

//! Local Chrome/Chromium driven over the DevTools protocol.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::{Child, Command};

use super::{BrowserLauncher, BrowserSession, PortalError, PortalPage, SelectOption};
use crate::clients::cdp::{CdpConnection, CdpError};
use crate::common::poll::{poll_until, PollPolicy};

const CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium-browser",
    "chromium",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/snap/bin/chromium",
];

/// First Chrome-like executable found on this machine.
pub fn find_chrome_executable() -> Option<String> {
    CANDIDATES.iter().find_map(|candidate| {
        let found = if candidate.starts_with('/') {
            Path::new(candidate).exists()
        } else {
            which::which(candidate).is_ok()
        };
        found.then(|| candidate.to_string())
    })
}

impl From<CdpError> for PortalError {
    fn from(e: CdpError) -> Self {
        PortalError::Browser(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: Option<String>,
    headless: bool,
    startup: PollPolicy,
    http: reqwest::Client,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<String>, headless: bool) -> Self {
        Self {
            executable,
            headless,
            startup: PollPolicy::new(50, Duration::from_millis(200)),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn attach(&self, profile: &Path) -> Result<CdpConnection, PortalError> {
        // --remote-debugging-port=0 makes Chrome pick a port and write it here.
        let port_file = profile.join("DevToolsActivePort");
        let port = poll_until(self.startup, || async {
            let contents = tokio::fs::read_to_string(&port_file).await.ok()?;
            contents.lines().next()?.trim().parse::<u16>().ok()
        })
        .await
        .ok_or_else(|| PortalError::Launch("DevTools endpoint never came up".into()))?;

        #[derive(Deserialize)]
        struct Target {
            #[serde(rename = "webSocketDebuggerUrl")]
            ws_url: String,
        }

        let target: Target = self
            .http
            .put(format!("http://127.0.0.1:{port}/json/new?about:blank"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortalError::Launch(format!("could not open a tab: {e}")))?
            .json()
            .await
            .map_err(|e| PortalError::Launch(format!("unexpected /json/new reply: {e}")))?;

        let conn = CdpConnection::connect(&target.ws_url).await?;
        conn.call("Page.enable", json!({})).await?;
        Ok(conn)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, PortalError> {
        let executable = self
            .executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or_else(|| PortalError::Launch("no Chrome/Chromium executable found".into()))?;

        let profile = TempDir::with_prefix("portal-profile-")
            .map_err(|e| PortalError::Launch(format!("profile dir: {e}")))?;

        let mut cmd = Command::new(&executable);
        cmd.arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .args(["--no-first-run", "--no-default-browser-check", "--disable-gpu"]);
        if self.headless {
            cmd.arg("--headless=new");
        }
        cmd.arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PortalError::Launch(format!("failed to start {executable}: {e}")))?;
        tracing::debug!(%executable, headless = self.headless, "browser process started");

        match self.attach(profile.path()).await {
            Ok(conn) => Ok(Box::new(ChromiumSession {
                child,
                _profile: profile,
                page: ChromiumPage {
                    conn,
                    nav_mark: AtomicU64::new(0),
                },
            })),
            Err(e) => {
                let _ = child.kill().await;
                Err(e)
            }
        }
    }
}

pub struct ChromiumSession {
    child: Child,
    _profile: TempDir,
    page: ChromiumPage,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> &dyn PortalPage {
        &self.page
    }

    async fn close(self: Box<Self>) -> Result<(), PortalError> {
        let ChromiumSession { mut child, _profile, page } = *self;
        page.conn.close();
        child
            .kill()
            .await
            .map_err(|e| PortalError::Browser(format!("could not stop the browser: {e}")))?;
        tracing::debug!("browser process stopped");
        Ok(())
    }
}

pub struct ChromiumPage {
    conn: CdpConnection,
    /// Load count before the last action that may navigate.
    nav_mark: AtomicU64,
}

fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

impl ChromiumPage {
    fn mark_navigation(&self) -> u64 {
        let mark = self.conn.load_count();
        self.nav_mark.store(mark, Ordering::SeqCst);
        mark
    }
}

#[async_trait]
impl PortalPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), PortalError> {
        let mark = self.mark_navigation();
        let reply = self.conn.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = reply.get("errorText").and_then(Value::as_str) {
            return Err(PortalError::Browser(format!("navigation to {url} failed: {error}")));
        }
        self.conn.wait_for_load_after(mark).await?;
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), PortalError> {
        let mark = self.nav_mark.load(Ordering::SeqCst);
        self.conn.wait_for_load_after(mark).await?;
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        let value = self.evaluate("location.href").await.ok()?;
        value.as_str().map(str::to_string)
    }

    async fn exists(&self, selector: &str) -> Result<bool, PortalError> {
        let script = format!("document.querySelector({}) !== null", js_str(selector));
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<bool, PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = {}; return true; }})()",
            js_str(selector),
            js_str(value)
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn dispatch_event(&self, selector: &str, event: &str) -> Result<(), PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (el) el.dispatchEvent(new Event({}, {{ bubbles: true }})); }})()",
            js_str(selector),
            js_str(event)
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<Option<String>, PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return null; return el.value !== undefined ? el.value : el.textContent; }})()",
            js_str(selector)
        );
        Ok(self.evaluate(&script).await?.as_str().map(str::to_string))
    }

    async fn select_options(&self, selector: &str) -> Result<Vec<SelectOption>, PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el || !el.options) return []; return Array.from(el.options).map(o => ({{ value: o.value, label: o.text }})); }})()",
            js_str(selector)
        );
        serde_json::from_value(self.evaluate(&script).await?)
            .map_err(|e| PortalError::Browser(format!("unreadable options for {selector}: {e}")))
    }

    async fn click(&self, selector: &str) -> Result<(), PortalError> {
        self.mark_navigation();
        // Deferred so the evaluation returns before the page unloads.
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; setTimeout(() => el.click(), 0); return true; }})()",
            js_str(selector)
        );
        match self.evaluate(&script).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(PortalError::Browser(format!("nothing to click at {selector}"))),
        }
    }

    async fn submit_form(&self) -> Result<bool, PortalError> {
        self.mark_navigation();
        let script = "(() => { const f = document.forms[0]; if (!f) return false; setTimeout(() => f.submit(), 0); return true; })()";
        Ok(self.evaluate(script).await?.as_bool().unwrap_or(false))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, PortalError> {
        let reply = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({ "expression": script, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(PortalError::Browser(text.to_string()));
        }
        Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_arguments_are_quoted_for_js() {
        assert_eq!(js_str("#ddlYear"), r##""#ddlYear""##);
        assert_eq!(js_str(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(js_str("line\nbreak"), r#""line\nbreak""#);
    }

    #[tokio::test]
    async fn missing_executable_fails_at_launch() {
        let launcher = ChromiumLauncher::new(Some("/nonexistent/chrome-for-tests".into()), true);

        let err = launcher.launch().await.err().unwrap();
        match err {
            PortalError::Launch(message) => assert!(message.contains("/nonexistent/chrome-for-tests")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
