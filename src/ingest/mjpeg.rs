//! HTTP camera source.
//!
//! Reads `multipart/x-mixed-replace` MJPEG streams by scanning for JPEG SOI/EOI
//! markers; endpoints that return a single JPEG are polled once per `read`.

use std::io::Read;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Context, Result};

use super::{ensure_open, frame_interval, SourceConfig, VideoSource};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegSource {
    config: SourceConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(config: SourceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(CONNECT_TIMEOUT)
            .build();
        Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        }
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.config.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl VideoSource for MjpegSource {
    fn describe(&self) -> String {
        format!("{} (http)", self.config.url)
    }

    fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        self.stream = Some(if content_type.to_lowercase().contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(Box::new(response.into_reader())))
        } else {
            HttpStream::SingleJpeg
        });
        log::info!("video source {} opened", self.describe());
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        ensure_open(self.stream.is_some(), "http source")?;
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let jpeg_bytes = match self.stream.as_mut() {
                Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg()?,
                Some(HttpStream::SingleJpeg) => self.fetch_single_jpeg()?,
                None => return Err(anyhow!("http source closed")),
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = Frame::from_jpeg(&jpeg_bytes)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(frame
                .with_index(self.frame_count)
                .with_captured_at(SystemTime::now()));
        }
    }

    fn release(&mut self) {
        self.stream = None;
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Byte range of the first complete JPEG (SOI through EOI) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
