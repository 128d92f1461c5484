use image::{Rgb, RgbImage};

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(frame: &RgbImage) -> Self {
        Self {
            x: 0,
            y: 0,
            width: frame.width(),
            height: frame.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        image::imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Inclusive per-channel RGB range of the result highlight colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl Default for HighlightBand {
    /// The green used for settled trades in the history strip.
    fn default() -> Self {
        Self {
            lower: [0, 150, 0],
            upper: [120, 255, 140],
        }
    }
}

impl HighlightBand {
    pub fn contains(&self, px: &Rgb<u8>) -> bool {
        (0..3).all(|c| (self.lower[c]..=self.upper[c]).contains(&px.0[c]))
    }
}

/// Bounding box of one 8-connected blob of highlighted pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: usize,
}

/// Finds the part of a frame most likely to hold the latest result marker:
/// the rightmost highlighted blob, padded.
#[derive(Debug, Clone)]
pub struct RoiLocator {
    band: HighlightBand,
    padding: u32,
    min_area: usize,
}

impl RoiLocator {
    pub fn new(band: HighlightBand, padding: u32, min_area: usize) -> Self {
        Self {
            band,
            padding,
            min_area: min_area.max(1),
        }
    }

    /// ROI for `frame`. Falls back to the whole frame when nothing is highlighted.
    pub fn locate(&self, frame: &RgbImage) -> Rect {
        let Some(region) = self
            .regions(frame)
            .into_iter()
            .max_by_key(|r| (r.max_x, r.area))
        else {
            return Rect::full(frame);
        };

        let x0 = region.min_x.saturating_sub(self.padding);
        let y0 = region.min_y.saturating_sub(self.padding);
        let x1 = region.max_x.saturating_add(self.padding).min(frame.width() - 1);
        let y1 = region.max_y.saturating_add(self.padding).min(frame.height() - 1);
        Rect {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        }
    }

    fn regions(&self, frame: &RgbImage) -> Vec<Region> {
        let (w, h) = frame.dimensions();
        let (wu, hu) = (w as usize, h as usize);
        let mask: Vec<bool> = frame.pixels().map(|px| self.band.contains(px)).collect();
        let mut seen = vec![false; wu * hu];
        let mut regions = Vec::new();
        let mut stack = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            stack.push(start);
            let mut region = Region {
                min_x: u32::MAX,
                min_y: u32::MAX,
                max_x: 0,
                max_y: 0,
                area: 0,
            };

            while let Some(idx) = stack.pop() {
                let (x, y) = ((idx % wu) as u32, (idx / wu) as u32);
                region.min_x = region.min_x.min(x);
                region.min_y = region.min_y.min(y);
                region.max_x = region.max_x.max(x);
                region.max_y = region.max_y.max(y);
                region.area += 1;

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                            continue;
                        }
                        let n = ny as usize * wu + nx as usize;
                        if mask[n] && !seen[n] {
                            seen[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            if region.area >= self.min_area {
                regions.push(region);
            }
        }
        regions
    }
}
