//! Playwright browser automation
//!
//! Each session is one Node process holding one browser context. Commands go
//! over stdin as JSON lines and every command gets exactly one JSON line back,
//! so the session is a strict request/response channel guarded by a mutex.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BrowserSettings, SuiteConfig};
use crate::error::{E2eError, E2eResult};
use crate::page::Page;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Check if Playwright is installed
pub fn check_playwright_installed() -> E2eResult<()> {
    let output = Command::new("npx")
        .args(["playwright", "--version"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match output {
        Ok(status) if status.success() => Ok(()),
        _ => Err(E2eError::PlaywrightNotFound),
    }
}

const BRIDGE_SCRIPT: &str = r#"
const path = require('path');
const readline = require('readline');
const playwright = require(require.resolve('playwright', { paths: [process.cwd(), __dirname] }));

(async () => {
  const browser = await playwright['__BROWSER__'].launch({ headless: __HEADLESS__ });
  const context = await browser.newContext({
    viewport: { width: __WIDTH__, height: __HEIGHT__ }
  });
  const page = await context.newPage();
  page.setDefaultTimeout(__ACTION_TIMEOUT__);
  const baseUrl = '__BASE_URL__';

  const first = (selector) => page.locator(selector).first();
  const present = async (selector) => (await page.locator(selector).count()) > 0;
  const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

  const handlers = {
    goto: async (r) => { await page.goto(/^https?:/.test(r.url) ? r.url : baseUrl + r.url); return null; },
    click: async (r) => { await first(r.selector).click(); return null; },
    fill: async (r) => { await first(r.selector).fill(r.value); return null; },
    is_visible: async (r) => (await present(r.selector)) && first(r.selector).isVisible(),
    is_enabled: async (r) => (await present(r.selector)) && first(r.selector).isEnabled(),
    text_content: async (r) => (await present(r.selector)) ? first(r.selector).textContent() : null,
    all_text_contents: async (r) => page.locator(r.selector).allTextContents(),
    attribute: async (r) => (await present(r.selector)) ? first(r.selector).getAttribute(r.name) : null,
    screenshot: async (r) => { await page.screenshot({ path: path.resolve(r.path), fullPage: true }); return null; },
    close: async () => null,
  };

  reply({ ready: true });
  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    const req = JSON.parse(line);
    try {
      const handler = handlers[req.op];
      if (!handler) throw new Error('unknown op ' + req.op);
      const value = await handler(req);
      reply({ id: req.id, ok: true, value: value === undefined ? null : value });
    } catch (error) {
      reply({ id: req.id, ok: false, error: error.message });
    }
    if (req.op === 'close') break;
  }
  await browser.close();
})().catch((error) => {
  console.error(error.stack || error.message);
  process.exit(1);
});
"#;

/// Fill the bridge template for one session
pub fn build_script(browser: &BrowserSettings, base_url: &str, action_timeout: Duration) -> String {
    BRIDGE_SCRIPT
        .replace("__BROWSER__", browser.kind.as_str())
        .replace("__HEADLESS__", if browser.headless { "true" } else { "false" })
        .replace("__WIDTH__", &browser.viewport.width.to_string())
        .replace("__HEIGHT__", &browser.viewport.height.to_string())
        .replace("__ACTION_TIMEOUT__", &action_timeout.as_millis().to_string())
        .replace("__BASE_URL__", &base_url.trim_end_matches('/').replace('\'', "\\'"))
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Goto { url: &'a str },
    Click { selector: &'a str },
    Fill { selector: &'a str, value: &'a str },
    IsVisible { selector: &'a str },
    IsEnabled { selector: &'a str },
    TextContent { selector: &'a str },
    AllTextContents { selector: &'a str },
    Attribute { selector: &'a str, name: &'a str },
    Screenshot { path: String },
    Close,
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    #[serde(flatten)]
    command: BridgeCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    error: Option<String>,
}

/// Slack on top of the in-page action timeout before a reply counts as lost
const REPLY_MARGIN: Duration = Duration::from_secs(5);

struct BridgeIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    /// Set once a reply went missing; later replies could belong to any request
    desynced: bool,
}

/// A live browser tab driven through the Node bridge
pub struct PlaywrightPage {
    io: Mutex<BridgeIo>,
    child: Mutex<Child>,
    /// Holds the bridge script until the session ends
    _script_dir: TempDir,
    name: String,
    reply_timeout: Duration,
}

impl PlaywrightPage {
    /// Launch a browser session for one scenario
    pub async fn launch(config: &SuiteConfig, name: &str) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        let script = build_script(&config.browser, &config.base_url, config.timeouts.page_ready());
        std::fs::write(&script_path, script)?;

        debug!(session = name, script = %script_path.display(), "Starting Playwright bridge");

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("failed to start node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        // browser launch can be slow on a cold cache
        let ready = tokio::time::timeout(config.timeouts.page_ready() * 3, lines.next_line())
            .await
            .map_err(|_| E2eError::Timeout(format!("Playwright bridge for {}", name)))??;
        match ready {
            Some(line) if line.contains("\"ready\"") => {}
            Some(line) => {
                return Err(E2eError::Playwright(format!("unexpected bridge greeting: {}", line)));
            }
            None => {
                return Err(E2eError::Playwright(
                    "bridge exited before the browser launched".to_string(),
                ));
            }
        }

        info!(session = name, browser = config.browser.kind.as_str(), "Browser session ready");
        Ok(Self {
            io: Mutex::new(BridgeIo {
                stdin,
                stdout: lines,
                next_id: 1,
                desynced: false,
            }),
            child: Mutex::new(child),
            _script_dir: script_dir,
            name: name.to_string(),
            reply_timeout: config.timeouts.page_ready() + REPLY_MARGIN,
        })
    }

    async fn send(&self, command: BridgeCommand<'_>) -> E2eResult<serde_json::Value> {
        let mut io = self.io.lock().await;
        if io.desynced {
            return Err(E2eError::Playwright(format!(
                "session {} lost a bridge reply and is no longer usable",
                self.name
            )));
        }
        let id = io.next_id;
        io.next_id += 1;

        let mut line = serde_json::to_string(&BridgeRequest { id, command })?;
        debug!(session = %self.name, request = %line, "Bridge request");
        line.push('\n');
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        let response = match read_reply(&mut io.stdout, id, self.reply_timeout).await {
            Ok(response) => response,
            Err(e) => {
                io.desynced = true;
                return Err(e);
            }
        };
        if !response.ok {
            return Err(E2eError::Playwright(
                response.error.unwrap_or_else(|| "unknown bridge failure".to_string()),
            ));
        }
        Ok(response.value)
    }
}

/// Read the reply to request `id`, giving up after `timeout`
async fn read_reply<R>(lines: &mut Lines<R>, id: u64, timeout: Duration) -> E2eResult<BridgeResponse>
where
    R: AsyncBufRead + Unpin,
{
    let reply = tokio::time::timeout(timeout, lines.next_line())
        .await
        .map_err(|_| E2eError::Timeout(format!("bridge reply to request {}", id)))??
        .ok_or_else(|| E2eError::Playwright("bridge closed its output".to_string()))?;
    let response: BridgeResponse = serde_json::from_str(&reply)?;

    if response.id != id {
        return Err(E2eError::Playwright(format!(
            "bridge answered request {} while {} was pending",
            response.id, id
        )));
    }
    Ok(response)
}

fn optional_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&self, path: &str) -> E2eResult<()> {
        self.send(BridgeCommand::Goto { url: path }).await.map(|_| ())
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.send(BridgeCommand::Click { selector }).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.send(BridgeCommand::Fill { selector, value }).await.map(|_| ())
    }

    async fn is_visible(&self, selector: &str) -> E2eResult<bool> {
        let value = self.send(BridgeCommand::IsVisible { selector }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, selector: &str) -> E2eResult<bool> {
        let value = self.send(BridgeCommand::IsEnabled { selector }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        let value = self.send(BridgeCommand::TextContent { selector }).await?;
        Ok(optional_string(value))
    }

    async fn all_text_contents(&self, selector: &str) -> E2eResult<Vec<String>> {
        let value = self.send(BridgeCommand::AllTextContents { selector }).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>> {
        let value = self.send(BridgeCommand::Attribute { selector, name }).await?;
        Ok(optional_string(value))
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.send(BridgeCommand::Screenshot {
            path: path.to_string_lossy().to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn close(&self) -> E2eResult<()> {
        if let Err(e) = self.send(BridgeCommand::Close).await {
            warn!(session = %self.name, error = %e, "Bridge did not close cleanly");
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(session = %self.name, ?status, "Bridge exited");
            }
            Err(_) => {
                warn!(session = %self.name, "Bridge still running, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}
