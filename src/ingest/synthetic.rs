use std::thread;
use std::time::{Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use url::Url;

use super::{ensure_open, frame_interval, SourceConfig, VideoSource};
use crate::frame::{Frame, Rgb};

pub const BELT_COLOR: Rgb = [96, 96, 96];
pub const APPLE_COLOR: Rgb = [200, 35, 30];
pub const BLEMISH_COLOR: Rgb = [40, 25, 15];

/// Frames the apple needs to cross the belt.
const PASS_FRAMES: u64 = 60;

/// Synthetic conveyor: one red disc ("apple") crosses the frame per pass, and every
/// pass cycles through no blemish, a small blemish and a large blemish.
///
/// URL query parameters: `seed` (vertical jitter), `fps`, `width`, `height`.
pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    target_fps: u32,
    seed: u64,
    rng: StdRng,
    frame_count: u64,
    pass_offset: i64,
    last_frame_at: Option<Instant>,
    open: bool,
}

impl SyntheticSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self::with_seed(config, 7)
    }

    pub fn from_url(config: &SourceConfig, url: &Url) -> Result<Self> {
        let mut config = config.clone();
        let mut seed = 7;
        for (key, value) in url.query_pairs() {
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("stub source parameter '{}' must be an integer", key))?;
            match key.as_ref() {
                "seed" => seed = parsed,
                "fps" => config.target_fps = to_u32(&key, parsed)?,
                "width" => config.width = to_u32(&key, parsed)?,
                "height" => config.height = to_u32(&key, parsed)?,
                other => return Err(anyhow!("unknown stub source parameter '{}'", other)),
            }
        }
        if config.width < 16 || config.height < 16 {
            return Err(anyhow!(
                "stub source frames must be at least 16x16, got {}x{}",
                config.width,
                config.height
            ));
        }
        Ok(Self::with_seed(&config, seed))
    }

    fn with_seed(config: &SourceConfig, seed: u64) -> Self {
        Self {
            url: config.url.clone(),
            width: config.width,
            height: config.height,
            target_fps: config.target_fps,
            seed,
            rng: StdRng::seed_from_u64(seed),
            frame_count: 0,
            pass_offset: 0,
            last_frame_at: None,
            open: false,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn render(&mut self) -> Result<Frame> {
        let step = self.frame_count % PASS_FRAMES;
        let pass = self.frame_count / PASS_FRAMES;
        if step == 0 {
            let jitter = i64::from(self.height / 10).max(1);
            self.pass_offset = self.rng.gen_range(-jitter..=jitter);
        }

        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let radius = (w.min(h) / 5).max(4);
        let cx = -radius + (w + 2 * radius) * step as i64 / PASS_FRAMES as i64;
        let cy = h / 2 + self.pass_offset;
        let blemish_radius = match pass % 3 {
            0 => 0,
            1 => radius / 4,
            _ => radius / 2,
        };
        let (bx, by) = (cx - radius / 3, cy - radius / 3);

        let mut frame = Frame::filled(self.width, self.height, BELT_COLOR)?;
        for y in (cy - radius).max(0)..(cy + radius + 1).min(h) {
            for x in (cx - radius).max(0)..(cx + radius + 1).min(w) {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let (ex, ey) = (x - bx, y - by);
                let color = if blemish_radius > 0
                    && ex * ex + ey * ey <= blemish_radius * blemish_radius
                {
                    BLEMISH_COLOR
                } else {
                    APPLE_COLOR
                };
                frame.put_pixel(x as u32, y as u32, color);
            }
        }
        Ok(frame)
    }
}

impl VideoSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "{} (synthetic {}x{} seed {})",
            self.url, self.width, self.height, self.seed
        )
    }

    fn open(&mut self) -> Result<()> {
        log::info!("video source {} opened", self.describe());
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        ensure_open(self.open, "synthetic source")?;
        self.pace();
        let frame = self.render()?;
        self.frame_count += 1;
        Ok(frame
            .with_index(self.frame_count)
            .with_captured_at(SystemTime::now()))
    }

    fn release(&mut self) {
        self.open = false;
    }
}

fn to_u32(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("stub source parameter '{}' is out of range", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(query: &str) -> SyntheticSource {
        let config = SourceConfig {
            url: format!("stub://belt{}", query),
            target_fps: 0,
            width: 120,
            height: 80,
        };
        let url = Url::parse(&config.url).unwrap();
        SyntheticSource::from_url(&config, &url).unwrap()
    }

    fn count(frame: &Frame, color: Rgb) -> usize {
        frame
            .pixels()
            .chunks_exact(3)
            .filter(|px| *px == color)
            .count()
    }

    #[test]
    fn read_requires_open() {
        let mut src = source("");
        assert!(src.read().is_err());
        src.open().unwrap();
        let frame = src.read().unwrap();
        assert_eq!(frame.dimensions(), (120, 80));
        assert_eq!(frame.index, 1);
        src.release();
        assert!(src.read().is_err());
    }

    #[test]
    fn query_parameters_override_config() {
        let src = source("?width=64&height=32&seed=3");
        assert_eq!((src.width, src.height, src.seed), (64, 32, 3));
        let config = SourceConfig {
            url: "stub://belt?speed=2".into(),
            ..Default::default()
        };
        let url = Url::parse(&config.url).unwrap();
        assert!(SyntheticSource::from_url(&config, &url).is_err());
    }

    #[test]
    fn passes_cycle_through_blemish_sizes() {
        let mut src = source("");
        src.open().unwrap();
        let mut blemish_at_mid_pass = Vec::new();
        for i in 0..(PASS_FRAMES * 3) {
            let frame = src.read().unwrap();
            if i % PASS_FRAMES == PASS_FRAMES / 2 {
                assert!(count(&frame, APPLE_COLOR) > 0);
                blemish_at_mid_pass.push(count(&frame, BLEMISH_COLOR));
            }
        }
        assert_eq!(blemish_at_mid_pass[0], 0);
        assert!(blemish_at_mid_pass[1] > 0);
        assert!(blemish_at_mid_pass[2] > blemish_at_mid_pass[1]);
    }

    #[test]
    fn same_seed_same_frames() {
        let mut a = source("?seed=11");
        let mut b = source("?seed=11");
        a.open().unwrap();
        b.open().unwrap();
        for _ in 0..5 {
            assert_eq!(a.read().unwrap().pixels(), b.read().unwrap().pixels());
        }
    }
}
