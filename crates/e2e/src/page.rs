//! The browser-driving capability every page object is written against
//!
//! Page objects, the status observer and the invoice manager only ever talk to a
//! `&dyn Page`. The Playwright bridge implements it for real sessions; tests plug
//! in a scripted page.

use std::path::Path;

use async_trait::async_trait;

use crate::error::E2eResult;

/// One isolated browser tab
///
/// Queries are single-shot: none of these methods wait for an element to
/// appear. Waiting is layered on top with [`crate::poll::poll_until`].
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to a path relative to the storefront base URL
    async fn goto(&self, path: &str) -> E2eResult<()>;

    /// Click the first element matching `selector`
    async fn click(&self, selector: &str) -> E2eResult<()>;

    /// Replace the value of an input
    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()>;

    /// Whether an element matching `selector` is currently visible.
    /// Absence is a valid answer and yields `false`.
    async fn is_visible(&self, selector: &str) -> E2eResult<bool>;

    /// Whether the element is present and enabled
    async fn is_enabled(&self, selector: &str) -> E2eResult<bool>;

    /// Text of the first match, `None` if nothing matches
    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>>;

    /// Text of every match, in document order
    async fn all_text_contents(&self, selector: &str) -> E2eResult<Vec<String>>;

    /// Attribute of the first match, `None` if the element or attribute is missing
    async fn attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>>;

    /// Write a full-page screenshot to `path`
    async fn screenshot(&self, path: &Path) -> E2eResult<()>;

    /// Tear the session down; further calls may fail
    async fn close(&self) -> E2eResult<()> {
        Ok(())
    }
}

/// Trimmed text of the first match, treating empty text as absent
pub async fn visible_text(page: &dyn Page, selector: &str) -> E2eResult<Option<String>> {
    if !page.is_visible(selector).await? {
        return Ok(None);
    }
    Ok(page
        .text_content(selector)
        .await?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}
