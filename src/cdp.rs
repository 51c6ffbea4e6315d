//! Chrome DevTools Protocol renderer

use crate::renderer::{CaptureOptions, ClipRect, RenderSession, Renderer};
use crate::{Error, ImageFormat, RendererConfig, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, DOM};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long to wait for `document.readyState` to reach `complete`.
const LOAD_WAIT: Duration = Duration::from_secs(10);
const LOAD_POLL: Duration = Duration::from_millis(10);

/// Keeps headless_chrome from closing a browser that sat idle between renders.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Renderer backed by a headless Chrome process (uses the `headless_chrome` crate)
///
/// Each session is a tab. All `headless_chrome` calls are blocking and run on
/// tokio's blocking pool.
pub struct CdpRenderer {
    browser: Mutex<Option<Browser>>,
    config: RendererConfig,
}

impl CdpRenderer {
    /// Launch Chrome with the given options.
    pub async fn launch(config: &RendererConfig) -> Result<Self> {
        let config = config.clone();
        let started = Instant::now();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .path(config.chrome_path.clone())
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = tokio::task::spawn_blocking(move || Browser::new(launch_options))
            .await?
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {:#}", e)))?;

        if !config.sandbox {
            warn!("Chrome sandbox is disabled");
        }
        info!(
            "launched headless Chrome in {}ms (viewport {}x{})",
            started.elapsed().as_millis(),
            config.viewport.width,
            config.viewport.height
        );

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            config,
        })
    }

    fn browser(&self) -> Result<Browser> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::SessionError("browser is closed".into()))
    }
}

#[async_trait]
impl Renderer for CdpRenderer {
    type Session = CdpSession;

    async fn new_session(&self) -> Result<CdpSession> {
        let browser = self.browser()?;
        let disable_javascript = self.config.disable_javascript;

        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>> {
            let tab = browser
                .new_tab()
                .map_err(|e| Error::SessionError(format!("Failed to create tab: {:#}", e)))?;
            if disable_javascript {
                tab.call_method(Emulation::SetScriptExecutionDisabled { value: true })
                    .map_err(|e| Error::SessionError(format!("Failed to disable script execution: {:#}", e)))?;
            }
            Ok(tab)
        })
        .await??;

        Ok(CdpSession { tab })
    }

    async fn close(&self) -> Result<()> {
        let browser = self.browser.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(browser) = browser {
            // dropping the last handle kills the child process
            tokio::task::spawn_blocking(move || drop(browser)).await?;
            info!("closed headless Chrome");
        }
        Ok(())
    }
}

/// A Chrome tab.
pub struct CdpSession {
    tab: Arc<Tab>,
}

impl CdpSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab)).await?
    }
}

fn main_frame_id(tab: &Tab) -> Result<String> {
    let tree = tab
        .call_method(Page::GetFrameTree(None))
        .map_err(|e| Error::LoadError(format!("Failed to read frame tree: {:#}", e)))?;
    Ok(tree.frame_tree.frame.id)
}

fn wait_until_complete(tab: &Tab) -> Result<()> {
    let started = Instant::now();
    loop {
        let state = tab
            .evaluate("document.readyState", false)
            .map_err(|e| Error::LoadError(format!("Failed to read document state: {:#}", e)))?;
        if state.value.as_ref().and_then(|v| v.as_str()) == Some("complete") {
            debug!("document complete after {}ms", started.elapsed().as_millis());
            return Ok(());
        }
        if started.elapsed() >= LOAD_WAIT {
            return Err(Error::LoadError(format!(
                "document did not finish loading within {}ms",
                LOAD_WAIT.as_millis()
            )));
        }
        std::thread::sleep(LOAD_POLL);
    }
}

fn layout_expression(selector: &str) -> Result<String> {
    let selector = serde_json::to_string(selector).map_err(|e| Error::LayoutError(e.to_string()))?;
    Ok(format!(
        r#"(function() {{
            const el = document.querySelector({});
            if (!el) return null;
            const r = el.getBoundingClientRect();
            return JSON.stringify({{ x: r.x, y: r.y, width: r.width, height: r.height }});
        }})()"#,
        selector
    ))
}

fn screenshot_format(format: ImageFormat) -> Page::CaptureScreenshotFormatOption {
    match format {
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        ImageFormat::Webp => Page::CaptureScreenshotFormatOption::Webp,
    }
}

fn set_transparent_background(tab: &Tab, transparent: bool) -> Result<()> {
    let color = transparent.then_some(DOM::RGBA {
        r: 0,
        g: 0,
        b: 0,
        a: Some(0.0),
    });
    tab.call_method(Emulation::SetDefaultBackgroundColorOverride { color })
        .map_err(|e| Error::RenderError(format!("Failed to override background: {:#}", e)))?;
    Ok(())
}

#[async_trait]
impl RenderSession for CdpSession {
    async fn set_content(&self, html: &str) -> Result<()> {
        let html = html.to_string();
        self.blocking(move |tab| {
            let frame_id = main_frame_id(tab)?;
            tab.call_method(Page::SetDocumentContent { frame_id, html })
                .map_err(|e| Error::LoadError(format!("Failed to set document content: {:#}", e)))?;
            wait_until_complete(tab)
        })
        .await
    }

    async fn evaluate_layout(&self, selector: &str) -> Result<ClipRect> {
        let expression = layout_expression(selector)?;
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let result = tab
                .evaluate(&expression, false)
                .map_err(|e| Error::LayoutError(format!("Evaluation failed: {:#}", e)))?;
            let json = result
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::LayoutError(format!("no element matches {}", selector)))?;
            serde_json::from_str::<ClipRect>(json)
                .map_err(|e| Error::LayoutError(format!("Unexpected bounding box {}: {}", json, e)))
        })
        .await
    }

    async fn capture(&self, clip: ClipRect, format: ImageFormat, options: CaptureOptions) -> Result<Vec<u8>> {
        self.blocking(move |tab| {
            if options.omit_background {
                set_transparent_background(tab, true)?;
            }
            let viewport = Page::Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            };
            let shot = tab
                .capture_screenshot(screenshot_format(format), options.quality, Some(viewport), true)
                .map_err(|e| Error::RenderError(format!("Screenshot failed: {:#}", e)));
            if options.omit_background {
                if let Err(e) = set_transparent_background(tab, false) {
                    warn!("{}", e);
                }
            }
            shot
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.blocking(|tab| {
            tab.close(false)
                .map_err(|e| Error::SessionError(format!("Failed to close tab: {:#}", e)))?;
            Ok(())
        })
        .await
    }
}
