//! Video sources.
//!
//! - `stub://…` synthetic conveyor scene (tests and demos)
//! - `http(s)://…` MJPEG / single-JPEG camera streams (feature: ingest-mjpeg)
//!
//! Sources are opened, read and released by the pipeline driver only. A failed
//! `read` is treated as transient: the driver releases the source, backs off and
//! opens it again.

#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
pub mod synthetic;

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::frame::Frame;

#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

pub trait VideoSource: Send {
    /// Human-readable identity for logs.
    fn describe(&self) -> String;

    /// Connect or reconnect. Called before the first read and after every release.
    fn open(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame>;

    /// Drop any connection state. Safe to call when not open.
    fn release(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    pub url: String,
    /// Decimate to this rate; 0 disables pacing.
    pub target_fps: u32,
    /// Synthetic frame size.
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://conveyor".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

/// Build a source for the configured URL. The source is not opened yet.
pub fn source_for(config: &SourceConfig) -> Result<Box<dyn VideoSource>> {
    let url = Url::parse(&config.url)
        .with_context(|| format!("parse video source url '{}'", config.url))?;
    match url.scheme() {
        "stub" => Ok(Box::new(SyntheticSource::from_url(config, &url)?)),
        "http" | "https" => {
            #[cfg(feature = "ingest-mjpeg")]
            {
                Ok(Box::new(MjpegSource::new(config.clone())))
            }
            #[cfg(not(feature = "ingest-mjpeg"))]
            {
                bail!("http video sources require the ingest-mjpeg feature")
            }
        }
        other => Err(anyhow!(
            "unsupported video source scheme '{}'; expected stub or http(s)",
            other
        )),
    }
}

/// Minimum spacing between frames for a target rate.
pub fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(u64::from((1000 / target_fps).max(1)))
    }
}

fn ensure_open(open: bool, what: &str) -> Result<()> {
    if !open {
        bail!("{} is not open; call open() first", what);
    }
    Ok(())
}
