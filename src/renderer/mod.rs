//! The renderer capability driven by the session pool and orchestrator.
//!
//! A [`Renderer`] owns one browser process; a [`RenderSession`] is one
//! browsing context inside it (a tab). Backends implement both traits:
//! `cdp` drives headless Chrome, [`NoopRenderer`] is an in-process stand-in
//! used by tests and by builds without the `cdp` feature.

use crate::{ImageFormat, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod noop;

pub use noop::NoopRenderer;

/// Bounding box of the rendered content, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipRect {
    /// True when there is nothing to capture (also for NaN extents).
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Format-specific capture options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    /// Compression quality for lossy formats
    pub quality: Option<u32>,
    /// Capture with a transparent page background
    pub omit_background: bool,
}

impl CaptureOptions {
    /// JPEG and WebP use a fixed quality; PNG is captured without background.
    pub fn for_format(format: ImageFormat, quality: u32) -> Self {
        match format {
            ImageFormat::Png => Self {
                quality: None,
                omit_background: true,
            },
            ImageFormat::Jpeg | ImageFormat::Webp => Self {
                quality: Some(quality),
                omit_background: false,
            },
        }
    }
}

/// A launched renderer from which sessions are opened.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    type Session: RenderSession;

    /// Open a new isolated session.
    async fn new_session(&self) -> Result<Self::Session>;

    /// Shut the renderer down. Sessions must be closed first.
    async fn close(&self) -> Result<()>;
}

/// One browsing context.
#[async_trait]
pub trait RenderSession: Send + Sync + 'static {
    /// Replace the session's document and wait until it has loaded.
    async fn set_content(&self, html: &str) -> Result<()>;

    /// Bounding box of the first element matching `selector` after layout.
    async fn evaluate_layout(&self, selector: &str) -> Result<ClipRect>;

    /// Capture the area inside `clip`.
    async fn capture(&self, clip: ClipRect, format: ImageFormat, options: CaptureOptions) -> Result<Vec<u8>>;

    /// Release the session's resources.
    async fn close(&self) -> Result<()>;
}
