//! Scripted in-memory storefront for integration tests
//!
//! Surfaces change on a timeline measured with tokio's clock, so tests run with
//! paused time and every poll sees a deterministic page.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use storefront_e2e::config::SuiteConfig;
use storefront_e2e::runner::SessionFactory;
use storefront_e2e::{E2eError, E2eResult, Page};

pub const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

#[derive(Debug, Clone)]
pub enum Change {
    Show(String, String),
    Hide(String),
    Texts(String, Vec<String>),
    Attr(String, String, String),
    Disable(String),
    Countdown(String, Duration),
}

impl Change {
    pub fn show(selector: &str, text: &str) -> Self {
        Change::Show(selector.to_string(), text.to_string())
    }

    pub fn hide(selector: &str) -> Self {
        Change::Hide(selector.to_string())
    }

    pub fn texts(selector: &str, texts: &[&str]) -> Self {
        Change::Texts(selector.to_string(), texts.iter().map(|t| t.to_string()).collect())
    }

    pub fn attr(selector: &str, name: &str, value: &str) -> Self {
        Change::Attr(selector.to_string(), name.to_string(), value.to_string())
    }

    pub fn countdown(selector: &str, remaining: Duration) -> Self {
        Change::Countdown(selector.to_string(), remaining)
    }
}

#[derive(Debug, Clone)]
struct Element {
    visible: bool,
    enabled: bool,
    text: Option<String>,
    texts: Vec<String>,
    attributes: HashMap<String, String>,
    countdown: Option<(Instant, Duration)>,
}

impl Default for Element {
    fn default() -> Self {
        Self {
            visible: true,
            enabled: true,
            text: None,
            texts: Vec::new(),
            attributes: HashMap::new(),
            countdown: None,
        }
    }
}

impl Element {
    fn current_text(&self, now: Instant) -> Option<String> {
        match self.countdown {
            Some((since, total)) => {
                let remaining = total.saturating_sub(now - since).as_secs();
                Some(format!("{:02}:{:02}", remaining / 60, remaining % 60))
            }
            None => self.text.clone(),
        }
    }
}

#[derive(Default)]
struct Script {
    elements: HashMap<String, Element>,
    pending: Vec<(Instant, Change)>,
    on_click: HashMap<String, Vec<(Duration, Change)>>,
    on_goto: HashMap<String, Vec<(Duration, Change)>>,
    clicks: Vec<String>,
    gotos: Vec<String>,
    fills: Vec<(String, String)>,
}

impl Script {
    fn apply(&mut self, change: Change, now: Instant) {
        match change {
            Change::Show(selector, text) => {
                let element = self.elements.entry(selector).or_default();
                element.visible = true;
                element.countdown = None;
                element.text = Some(text);
            }
            Change::Hide(selector) => {
                if let Some(element) = self.elements.get_mut(&selector) {
                    element.visible = false;
                }
            }
            Change::Texts(selector, texts) => {
                let element = self.elements.entry(selector).or_default();
                element.text = texts.first().cloned();
                element.texts = texts;
            }
            Change::Attr(selector, name, value) => {
                self.elements
                    .entry(selector)
                    .or_default()
                    .attributes
                    .insert(name, value);
            }
            Change::Disable(selector) => {
                self.elements.entry(selector).or_default().enabled = false;
            }
            Change::Countdown(selector, remaining) => {
                let element = self.elements.entry(selector).or_default();
                element.visible = true;
                element.countdown = Some((now, remaining));
            }
        }
    }

    /// Apply every scheduled change that is due
    fn tick(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Instant, Change)> = Vec::new();
        self.pending.retain(|(at, change)| {
            if *at <= now {
                due.push((*at, change.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        for (at, change) in due {
            self.apply(change, at);
        }
    }

    fn schedule(&mut self, reactions: Vec<(Duration, Change)>) {
        let now = Instant::now();
        for (delay, change) in reactions {
            if delay.is_zero() {
                self.apply(change, now);
            } else {
                self.pending.push((now + delay, change));
            }
        }
    }

    fn visible(&self, selector: &str) -> Option<&Element> {
        self.elements.get(selector).filter(|e| e.visible)
    }
}

/// A page whose surfaces follow a script
#[derive(Default)]
pub struct ScriptedPage {
    script: Mutex<Script>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a change right now
    pub fn set(&self, change: Change) -> &Self {
        let mut script = self.script.lock();
        script.tick();
        script.apply(change, Instant::now());
        self
    }

    pub fn show(&self, selector: &str, text: &str) -> &Self {
        self.set(Change::show(selector, text))
    }

    /// Apply a change `delay` from now
    pub fn after(&self, delay: Duration, change: Change) -> &Self {
        self.script.lock().pending.push((Instant::now() + delay, change));
        self
    }

    /// Apply a change `delay` after every click on `selector`
    pub fn on_click(&self, selector: &str, delay: Duration, change: Change) -> &Self {
        self.script
            .lock()
            .on_click
            .entry(selector.to_string())
            .or_default()
            .push((delay, change));
        self
    }

    /// Apply a change `delay` after every navigation to `path`
    pub fn on_goto(&self, path: &str, delay: Duration, change: Change) -> &Self {
        self.script
            .lock()
            .on_goto
            .entry(path.to_string())
            .or_default()
            .push((delay, change));
        self
    }

    pub fn click_count(&self, selector: &str) -> usize {
        self.script.lock().clicks.iter().filter(|c| *c == selector).count()
    }

    pub fn gotos(&self) -> Vec<String> {
        self.script.lock().gotos.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.script.lock().fills.clone()
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&self, path: &str) -> E2eResult<()> {
        let mut script = self.script.lock();
        script.tick();
        script.gotos.push(path.to_string());
        let reactions = script.on_goto.get(path).cloned().unwrap_or_default();
        script.schedule(reactions);
        Ok(())
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        let mut script = self.script.lock();
        script.tick();
        if script.visible(selector).is_none() {
            return Err(E2eError::Playwright(format!("no visible element for {}", selector)));
        }
        script.clicks.push(selector.to_string());
        let reactions = script.on_click.get(selector).cloned().unwrap_or_default();
        script.schedule(reactions);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        let mut script = self.script.lock();
        script.tick();
        if script.visible(selector).is_none() {
            return Err(E2eError::Playwright(format!("no visible input for {}", selector)));
        }
        script.fills.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> E2eResult<bool> {
        let mut script = self.script.lock();
        script.tick();
        Ok(script.visible(selector).is_some())
    }

    async fn is_enabled(&self, selector: &str) -> E2eResult<bool> {
        let mut script = self.script.lock();
        script.tick();
        Ok(script.elements.get(selector).is_some_and(|e| e.enabled))
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        let mut script = self.script.lock();
        script.tick();
        let now = Instant::now();
        Ok(script.elements.get(selector).and_then(|e| e.current_text(now)))
    }

    async fn all_text_contents(&self, selector: &str) -> E2eResult<Vec<String>> {
        let mut script = self.script.lock();
        script.tick();
        Ok(script
            .elements
            .get(selector)
            .map(|e| e.texts.clone())
            .unwrap_or_default())
    }

    async fn attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>> {
        let mut script = self.script.lock();
        script.tick();
        Ok(script
            .elements
            .get(selector)
            .and_then(|e| e.attributes.get(name).cloned()))
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"scripted screenshot")?;
        Ok(())
    }
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Checkout page offering card and Bitcoin; picking Bitcoin renders an invoice after `delay`
pub fn bitcoin_checkout(config: &SuiteConfig, delay: Duration) -> ScriptedPage {
    let s = &config.selectors;
    let page = ScriptedPage::new();
    let option = s.payment_method_option("bitcoin");

    page.set(Change::texts(&s.payment_method_options, &["Credit card", "Bitcoin"]))
        .show(&option, "Bitcoin")
        .on_click(&option, Duration::ZERO, Change::show(&s.payment_method_region("bitcoin"), ""));

    for change in invoice_changes(config, "inv-1", secs(15 * 60)) {
        page.on_click(&option, delay, change);
    }
    page
}

/// Everything the success surface renders for one invoice
pub fn invoice_changes(config: &SuiteConfig, id: &str, remaining: Duration) -> Vec<Change> {
    let s = &config.selectors;
    vec![
        Change::show(&s.invoice, ""),
        Change::attr(&s.invoice, &s.invoice_id_attribute, id),
        Change::show(&s.btc_amount, "0.00123456 BTC"),
        Change::show(&s.sats_amount, "123,456 sats"),
        Change::show(&s.exchange_rate, "1 BTC = $81,000.00"),
        Change::show(&s.address, ADDRESS),
        Change::show(&s.qr_code, ""),
        Change::attr(
            &s.qr_code,
            &s.qr_payload_attribute,
            &format!("bitcoin:{}?amount=0.00123456", ADDRESS),
        ),
        Change::countdown(&s.countdown, remaining),
        Change::show(&s.status_region, "Waiting for payment..."),
        Change::show(&s.copy_address, "Copy address"),
        Change::show(&s.copy_amount, "Copy amount"),
        Change::show(&s.refresh_invoice, "Refresh"),
    ]
}

/// Cart with one fixture product at $99.99 once the product is added
pub fn storefront_cart(config: &SuiteConfig, page: &ScriptedPage) {
    let s = &config.selectors;
    page.show(&s.cart_empty, "Your cart is empty")
        .show(&s.add_to_cart, "Add to cart")
        .show(&s.coupon_input, "")
        .show(&s.coupon_apply, "Apply")
        .on_click(&s.add_to_cart, Duration::ZERO, Change::hide(&s.cart_empty))
        .on_click(&s.add_to_cart, Duration::ZERO, Change::show(&s.cart_items, "E2E Test Product"))
        .on_click(&s.add_to_cart, Duration::ZERO, Change::show(&s.cart_subtotal, "$99.99"))
        .on_click(&s.add_to_cart, Duration::ZERO, Change::show(&s.cart_total, "Total: $99.99"));
}

type Builder = Box<dyn Fn(&SuiteConfig) -> ScriptedPage + Send + Sync>;

/// Opens a freshly scripted page for every scenario
pub struct ScriptedSessions {
    config: SuiteConfig,
    build: Builder,
}

impl ScriptedSessions {
    pub fn new(config: &SuiteConfig, build: impl Fn(&SuiteConfig) -> ScriptedPage + Send + Sync + 'static) -> Self {
        Self {
            config: config.clone(),
            build: Box::new(build),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(&self, _scenario: &str) -> E2eResult<Box<dyn Page>> {
        Ok(Box::new((self.build)(&self.config)))
    }
}
