use crate::driver::web::PageSnapshot;
use anyhow::Result;
use async_trait::async_trait;

/// Interactive surface of a browser session, as seen by the AI test-step
/// wrapper and the failure hook. Session lifecycle (launch, close) stays
/// on the concrete session type.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Navigate to a URL
    async fn goto(&self, url: &str) -> Result<()>;

    /// Snapshot the current page (url, title, trimmed HTML)
    async fn snapshot(&self) -> Result<PageSnapshot>;

    /// Click the first element matching a CSS selector
    async fn click(&self, selector: &str) -> Result<()>;

    /// Fill an input matching a CSS selector
    async fn fill(&self, selector: &str, text: &str) -> Result<()>;

    /// PNG screenshot of the current viewport
    async fn screenshot_bytes(&self) -> Result<Vec<u8>>;

    /// Type text at the current focus
    async fn type_text(&self, text: &str) -> Result<()>;

    /// Press a single key (e.g. "Enter")
    async fn press_key(&self, key: &str) -> Result<()>;
}
