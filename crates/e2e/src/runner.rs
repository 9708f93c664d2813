//! Main test runner that orchestrates the storefront, browser sessions and scenarios

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixtures::FixtureRegistry;
use crate::page::Page;
use crate::playwright::{check_playwright_installed, PlaywrightPage};
use crate::scenarios::{self, Diagnostics, Scenario, ScenarioContext, ScenarioFilter};
use crate::storefront::StorefrontHandle;

/// Opens one isolated browser session per scenario
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, scenario: &str) -> E2eResult<Box<dyn Page>>;
}

/// Real sessions: one Playwright bridge process per scenario
pub struct PlaywrightSessions {
    config: SuiteConfig,
}

impl PlaywrightSessions {
    pub fn new(config: SuiteConfig) -> E2eResult<Self> {
        check_playwright_installed()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl SessionFactory for PlaywrightSessions {
    async fn open(&self, scenario: &str) -> E2eResult<Box<dyn Page>> {
        let page = PlaywrightPage::launch(&self.config, scenario).await?;
        Ok(Box::new(page))
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Whether the failure was a wait that ran out rather than a broken surface
    pub recoverable: Option<bool>,
    pub diagnostics: Diagnostics,
    pub failure_report: Option<PathBuf>,
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl TestSuiteResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotArtifact {
    pub path: PathBuf,
    pub sha256: String,
}

/// Written to `<output>/artifacts/<scenario>.failure.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub scenario: String,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub error: String,
    pub diagnostics: Diagnostics,
    pub screenshot: Option<ScreenshotArtifact>,
}

/// Main E2E test runner
pub struct TestRunner {
    config: SuiteConfig,
    sessions: Box<dyn SessionFactory>,
    fixtures: FixtureRegistry,
    storefront: Option<StorefrontHandle>,
}

impl TestRunner {
    /// Runner backed by real Playwright sessions
    pub fn new(config: SuiteConfig) -> E2eResult<Self> {
        let sessions = PlaywrightSessions::new(config.clone())?;
        Ok(Self::with_sessions(config, Box::new(sessions)))
    }

    pub fn with_sessions(config: SuiteConfig, sessions: Box<dyn SessionFactory>) -> Self {
        Self {
            config,
            sessions,
            fixtures: FixtureRegistry::new(),
            storefront: None,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Launch (if configured) and health-check the storefront
    pub async fn start_storefront(&mut self) -> E2eResult<()> {
        if self.storefront.is_some() {
            return Ok(());
        }
        let storefront = StorefrontHandle::start(&self.config).await?;
        info!(
            base_url = storefront.base_url(),
            managed = storefront.is_managed(),
            "Storefront ready"
        );
        self.storefront = Some(storefront);
        Ok(())
    }

    pub fn stop_storefront(&mut self) -> E2eResult<()> {
        if let Some(mut storefront) = self.storefront.take() {
            storefront.stop()?;
        }
        Ok(())
    }

    /// Run every scenario the filter selects
    pub async fn run(&mut self, filter: &ScenarioFilter) -> E2eResult<TestSuiteResult> {
        let selected = scenarios::select(filter);
        if selected.is_empty() {
            return Err(E2eError::Config(format!(
                "no scenario matches name {:?} and tag {:?}",
                filter.name, filter.tag
            )));
        }

        self.start_storefront().await?;
        let skipped = scenarios::all().len() - selected.len();
        let mut result = self.run_scenarios(&selected).await;
        result.skipped = skipped;
        Ok(result)
    }

    /// Run scenarios concurrently, at most `parallelism` at a time
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> TestSuiteResult {
        let start = Instant::now();
        info!(count = scenarios.len(), parallelism = self.config.parallelism, "Running scenarios...");

        let mut indexed: Vec<(usize, ScenarioResult)> = stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| async move { (i, self.run_scenario(scenario).await) })
            .buffer_unordered(self.config.parallelism.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        let results: Vec<ScenarioResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!("Test Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        TestSuiteResult {
            total: results.len(),
            passed,
            failed,
            skipped: 0,
            duration_ms,
            results,
        }
    }

    /// Run one scenario in a fresh session, holding its fixture leases throughout
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let leases = scenario.leases(&self.config);
        let _lease = self.fixtures.acquire(&leases).await;

        let page = match self.sessions.open(scenario.name).await {
            Ok(page) => page,
            Err(e) => {
                error!("✗ {} - could not open a browser session: {}", scenario.name, e);
                return ScenarioResult {
                    name: scenario.name.to_string(),
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    recoverable: Some(e.is_recoverable()),
                    error: Some(e.to_string()),
                    diagnostics: Diagnostics::default(),
                    failure_report: None,
                };
            }
        };

        let ctx = ScenarioContext::new(page.as_ref(), &self.config);
        let span = tracing::info_span!("scenario", scenario = scenario.name, run_id = %ctx.run_id);
        let outcome = async {
            debug!(description = scenario.description, "Scenario started");
            (scenario.run)(&ctx).await
        }
        .instrument(span)
        .await;

        let mut diagnostics = ctx.diagnostics();
        let (error, recoverable, failure_report) = match outcome {
            Ok(()) => (None, None, None),
            Err(e) => {
                if diagnostics.last_status.is_none() {
                    diagnostics.last_status = e.last_observed();
                }
                let report = match self.write_failure_report(scenario, &ctx, &e).await {
                    Ok(path) => Some(path),
                    Err(report_err) => {
                        warn!(scenario = scenario.name, error = %report_err, "Could not write failure report");
                        None
                    }
                };
                (Some(e.to_string()), Some(e.is_recoverable()), report)
            }
        };
        drop(ctx);

        if let Err(e) = page.close().await {
            warn!(scenario = scenario.name, error = %e, "Browser session did not close cleanly");
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match &error {
            None => info!("✓ {} ({} ms)", scenario.name, duration_ms),
            Some(message) => error!("✗ {} - {}", scenario.name, message),
        }

        ScenarioResult {
            name: scenario.name.to_string(),
            success: error.is_none(),
            duration_ms,
            error,
            recoverable,
            diagnostics,
            failure_report,
        }
    }

    /// Screenshot the session and write the failure report next to it
    async fn write_failure_report(
        &self,
        scenario: &Scenario,
        ctx: &ScenarioContext<'_>,
        error: &E2eError,
    ) -> E2eResult<PathBuf> {
        let dir = self.config.output_dir.join("artifacts");
        std::fs::create_dir_all(&dir)?;

        let screenshot_path = dir.join(format!("{}.failure.png", scenario.name));
        let screenshot = match ctx.page.screenshot(&screenshot_path).await {
            Ok(()) => Some(ScreenshotArtifact {
                sha256: sha256_file(&screenshot_path)?,
                path: screenshot_path,
            }),
            Err(e) => {
                warn!(scenario = scenario.name, error = %e, "Failure screenshot not captured");
                None
            }
        };

        let mut diagnostics = ctx.diagnostics();
        if diagnostics.last_status.is_none() {
            diagnostics.last_status = error.last_observed();
        }

        let report = FailureReport {
            scenario: scenario.name.to_string(),
            run_id: ctx.run_id,
            recorded_at: Utc::now(),
            error: error.to_string(),
            diagnostics,
            screenshot,
        };

        let path = dir.join(format!("{}.failure.json", scenario.name));
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!("Failure report written to: {}", path.display());
        Ok(path)
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Drop for TestRunner {
    fn drop(&mut self) {
        let _ = self.stop_storefront();
    }
}

fn sha256_file(path: &Path) -> E2eResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
