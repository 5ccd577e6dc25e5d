//! Browser session factory built on Playwright
//!
//! `Playwright::initialize()` provisions the driver binary; the browser
//! executable itself is resolved from an env override, then well-known
//! system paths, then PATH, falling back to Playwright's managed browser.
//! A session owns the browser process and must be closed on every exit
//! path; the runner calls `close()` in both the pass and fail arms.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use playwright::api::{Browser, BrowserContext, Page, ScreenshotType, Viewport};
use playwright::Playwright;
use tokio::sync::Mutex;

use crate::driver::traits::SessionDriver;
use crate::utils::config::Settings;

/// A condensed view of the current page, fed to the AI backend.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub html: String,
}

/// Upper bound on HTML handed to the backend. Pages routinely exceed model
/// context windows; the head of the document carries most of the structure.
const SNAPSHOT_HTML_LIMIT: usize = 30_000;

/// A live browser session. One per test case, exclusively owned.
pub struct WebSession {
    #[allow(dead_code)]
    playwright: Playwright,
    browser: Browser,
    context: BrowserContext,
    page: Mutex<Page>,
    default_timeout_ms: u64,
}

impl WebSession {
    /// Provision the driver and launch a headless Chromium session.
    /// Failure here is a setup error: fatal, no retry.
    pub async fn launch(settings: &Settings) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("failed to initialize Playwright driver")?;

        let chromium = playwright.chromium();
        let mut launcher = chromium.launcher();
        launcher = launcher.headless(settings.headless);

        let executable = resolve_browser_executable();
        if let Some(ref path) = executable {
            log::info!("using browser executable: {}", path.display());
            launcher = launcher.executable(path);
        } else {
            log::info!("no system browser found, using Playwright's managed browser");
        }

        let args: Vec<String> = [
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        launcher = launcher.args(&args);

        let browser = launcher
            .launch()
            .await
            .context("failed to launch browser")?;

        let context = browser
            .context_builder()
            .build()
            .await
            .context("failed to create browser context")?;

        let page = context
            .new_page()
            .await
            .context("failed to open a new page")?;

        page.set_viewport_size(Viewport {
            width: settings.viewport_width as i32,
            height: settings.viewport_height as i32,
        })
        .await?;

        println!(
            "  {} browser session ready ({}x{}, headless={})",
            "▸".blue(),
            settings.viewport_width,
            settings.viewport_height,
            settings.headless
        );

        Ok(Self {
            playwright,
            browser,
            context,
            page: Mutex::new(page),
            default_timeout_ms: settings.default_timeout_ms,
        })
    }

    /// Tear down the session. Must run on every exit path.
    pub async fn close(self) -> Result<()> {
        self.context
            .close()
            .await
            .context("failed to close browser context")?;
        self.browser
            .close()
            .await
            .context("failed to close browser")?;
        Ok(())
    }
}

#[async_trait]
impl SessionDriver for WebSession {
    async fn goto(&self, url: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .goto()
            .await
            .with_context(|| format!("failed to navigate to {}", url))?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot> {
        let page = self.page.lock().await;
        let url: String = page.evaluate("() => document.location.href", ()).await?;
        let title: String = page.evaluate("() => document.title", ()).await?;
        let mut html = page.content().await?;
        if html.len() > SNAPSHOT_HTML_LIMIT {
            let mut cut = SNAPSHOT_HTML_LIMIT;
            while !html.is_char_boundary(cut) {
                cut -= 1;
            }
            html.truncate(cut);
        }
        Ok(PageSnapshot { url, title, html })
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.wait_for_selector_builder(selector)
            .timeout(self.default_timeout_ms as f64)
            .wait_for_selector()
            .await
            .with_context(|| format!("element '{}' did not appear", selector))?;
        page.click_builder(selector)
            .click()
            .await
            .with_context(|| format!("failed to click '{}'", selector))?;
        Ok(())
    }

    async fn screenshot_bytes(&self) -> Result<Vec<u8>> {
        let page = self.page.lock().await;
        let bytes = page
            .screenshot_builder()
            .r#type(ScreenshotType::Png)
            .screenshot()
            .await
            .context("failed to capture screenshot")?;
        Ok(bytes)
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.wait_for_selector_builder(selector)
            .timeout(self.default_timeout_ms as f64)
            .wait_for_selector()
            .await
            .with_context(|| format!("element '{}' did not appear", selector))?;
        let element = page
            .query_selector(selector)
            .await?
            .with_context(|| format!("element '{}' not found", selector))?;
        element
            .fill_builder(text)
            .fill()
            .await
            .with_context(|| format!("failed to fill '{}'", selector))?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.keyboard.input_text(text).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.keyboard.down(key).await?;
        page.keyboard.up(key).await?;
        Ok(())
    }
}

/// Resolve a Chromium-family executable: env override first, then known
/// install locations, then PATH.
pub fn resolve_browser_executable() -> Option<std::path::PathBuf> {
    if let Ok(path) = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH") {
        return Some(std::path::PathBuf::from(path));
    }

    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];
    for path in common_paths {
        let p = std::path::Path::new(path);
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    for name in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(p) = which::which(name) {
            return Some(p);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_truncation_respects_char_boundary() {
        // Mirrors the truncation logic in snapshot()
        let mut html = "é".repeat(SNAPSHOT_HTML_LIMIT);
        let mut cut = SNAPSHOT_HTML_LIMIT;
        while !html.is_char_boundary(cut) {
            cut -= 1;
        }
        html.truncate(cut);
        assert!(html.len() <= SNAPSHOT_HTML_LIMIT);
        assert!(std::str::from_utf8(html.as_bytes()).is_ok());
    }
}
