//! Packed per-pixel binary masks.
//!
//! A `BinaryMask` stores one bit per pixel in row-major order, 64 pixels per word.
//! Bits past `width * height` in the last word are always zero, so popcounts over
//! whole words are exact.

use anyhow::{anyhow, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    words: Vec<u64>,
}

impl BinaryMask {
    /// All-zero mask of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            words: vec![0; len.div_ceil(64)],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    /// Mask with the half-open rectangle `[x0, x1) x [y0, y1)` set, clipped to bounds.
    pub fn from_rect(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (x1, y1) = (x1.min(width), y1.min(height));
        Self::from_fn(width, height, |x, y| x >= x0 && x < x1 && y >= y0 && y < y1)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn same_shape(&self, other: &BinaryMask) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = self.index(x, y);
        self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Set or clear one pixel. Out-of-bounds coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.index(x, y);
        if value {
            self.words[idx / 64] |= 1u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1u64 << (idx % 64));
        }
    }

    /// Number of set pixels.
    pub fn count(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// In-place union with another mask of the same shape.
    pub fn union_with(&mut self, other: &BinaryMask) -> Result<()> {
        self.check_shape(other)?;
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
        Ok(())
    }

    /// Number of pixels set in both masks.
    pub fn intersection_count(&self, other: &BinaryMask) -> Result<u64> {
        self.check_shape(other)?;
        Ok(self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| u64::from((a & b).count_ones()))
            .sum())
    }

    /// Tight bounding box `(x0, y0, x1, y1)` of set pixels, exclusive on the far edge.
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y) in self.iter_set() {
            bounds = Some(match bounds {
                None => (x, y, x + 1, y + 1),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
            });
        }
        bounds
    }

    /// Iterate the coordinates of set pixels in row-major order.
    pub fn iter_set(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width as usize;
        self.words
            .iter()
            .enumerate()
            .filter(|(_, word)| **word != 0)
            .flat_map(move |(word_idx, word)| {
                let word = *word;
                (0..64usize)
                    .filter(move |bit| word & (1u64 << bit) != 0)
                    .map(move |bit| {
                        let idx = word_idx * 64 + bit;
                        ((idx % width) as u32, (idx / width) as u32)
                    })
            })
    }

    /// Nearest-neighbour resample to a new size.
    pub fn resized(&self, width: u32, height: u32) -> BinaryMask {
        if self.width == 0 || self.height == 0 {
            return BinaryMask::new(width, height);
        }
        BinaryMask::from_fn(width, height, |x, y| {
            let sx = (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as u32;
            let sy = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as u32;
            self.get(sx, sy)
        })
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn check_shape(&self, other: &BinaryMask) -> Result<()> {
        if !self.same_shape(other) {
            return Err(anyhow!(
                "mask shape mismatch: {}x{} vs {}x{}",
                self.width,
                self.height,
                other.width,
                other.height
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BinaryMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryMask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("set", &self.count())
            .finish()
    }
}
