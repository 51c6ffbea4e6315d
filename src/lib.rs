//! html2img render service
//!
//! Turns submitted HTML fragments into PNG, JPEG or WebP images using a pool of
//! reusable headless browser sessions.
//!
//! # Features
//!
//! - **CDP Backend** (default): renders with headless Chrome over the Chrome DevTools Protocol
//! - **Allow-list validation**: markup that could run script or fetch from
//!   untrusted origins is rejected before it reaches the browser
//! - **Session reuse**: browser tabs are pooled and evicted after sitting idle
//!
//! # Example
//!
//! ```no_run
//! use html2img::{Encoding, ImageFormat, NoopRenderer, RenderOptions, RenderOrchestrator, RenderRequest, SessionPool};
//!
//! # async fn run() -> html2img::Result<()> {
//! let pool = SessionPool::new(NoopRenderer::new());
//! let orchestrator = RenderOrchestrator::new(pool.clone(), RenderOptions::default());
//!
//! let request = RenderRequest { format: ImageFormat::Png, encoding: Encoding::Base64 };
//! let output = orchestrator.render("<b>hello</b>", &request).await?;
//! println!("{}", output.data_uri(request.format));
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod stylesheet;
pub mod validator;
pub use validator::{AllowList, Rejection, Validator};

pub mod renderer;
pub use renderer::{CaptureOptions, ClipRect, NoopRenderer, RenderSession, Renderer};

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod pool;
pub use pool::{PoolStats, SessionLease, SessionPool, SessionState};

pub mod sweeper;
pub use sweeper::{EvictionSweeper, SweeperHandle};

pub mod orchestrator;
pub use orchestrator::{RenderOptions, RenderOrchestrator, RenderOutput, RenderRequest};

pub mod server;

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for launching the browser
///
/// The defaults are conservative: the Chrome sandbox stays on and page script
/// is disabled in every session, so the validator is not the only barrier.
///
/// # Examples
///
/// ```
/// let cfg = html2img::RendererConfig::default();
/// assert!(cfg.sandbox && cfg.disable_javascript);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Browser window size
    pub viewport: Viewport,
    /// Whether to keep the Chrome sandbox enabled
    pub sandbox: bool,
    /// Whether to disable script execution in every session
    pub disable_javascript: bool,
    /// Explicit Chrome binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            sandbox: true,
            disable_javascript: true,
            chrome_path: None,
        }
    }
}

/// Process-level configuration of the render service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size in bytes
    pub body_limit: usize,
    /// Whether submitted markup is validated (operator trust override when false)
    pub validate: bool,
    /// Origin prefixes from which images and stylesheet resources may load
    pub allowed_origins: Vec<String>,
    /// Whether to apply the additional strict validation rules
    pub strict_validation: bool,
    /// How long a session may sit idle before it is evicted
    pub idle_timeout: Duration,
    /// How often the eviction sweeper runs
    pub sweep_interval: Duration,
    /// Deadline for a single render, including session acquisition
    pub render_timeout: Duration,
    /// Quality used for lossy formats
    pub jpeg_quality: u32,
    /// Browser launch options
    pub renderer: RendererConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50002,
            body_limit: 4 * 1024 * 1024,
            validate: true,
            allowed_origins: Vec::new(),
            strict_validation: false,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            render_timeout: Duration::from_secs(30),
            jpeg_quality: 80,
            renderer: RendererConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build the validator, or `None` when validation is turned off.
    ///
    /// Fails with [`Error::ConfigError`] when an allow-list entry is not an
    /// absolute http(s) URL.
    pub fn validator(&self) -> Result<Option<Validator>> {
        let allow_list = AllowList::new(&self.allowed_origins)?;
        if !self.validate {
            return Ok(None);
        }
        Ok(Some(Validator::new(allow_list).strict(self.strict_validation)))
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            render_timeout: self.render_timeout,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Reject settings the service cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(Error::ConfigError(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::ConfigError("sweep interval must be positive".into()));
        }
        if self.render_timeout.is_zero() {
            return Err(Error::ConfigError("render timeout must be positive".into()));
        }
        if self.body_limit == 0 {
            return Err(Error::ConfigError("body limit must be positive".into()));
        }
        AllowList::new(&self.allowed_origins).map(|_| ())
    }
}

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// Name used in `data:image/<name>` URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the image is returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw image bytes
    #[default]
    Binary,
    /// `data:image/<type>;base64,<data>` text
    Base64,
}
