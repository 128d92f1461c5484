use image::imageops::{self, FilterType};
use image::GrayImage;

/// Minimum normalized correlation for a template to count as present.
pub const MATCH_THRESHOLD: f32 = 0.8;

const FLAT_EPSILON: f64 = 1e-6;

/// Above this many multiply-adds the search goes coarse-to-fine.
const EXHAUSTIVE_BUDGET: u64 = 4_000_000;
/// Coarse grid cells refined at full resolution.
const COARSE_CANDIDATES: usize = 8;

/// Best zero-mean normalized cross-correlation of `template` over every
/// placement inside `haystack`, in `[-1, 1]`.
///
/// Small searches score every placement. Large ones score a grid spaced a
/// quarter of the template's short side, then search exhaustively around
/// the best grid cells.
///
/// `None` when the template does not fit inside the haystack.
pub fn best_match(haystack: &GrayImage, template: &GrayImage) -> Option<f32> {
    let search = Search::new(haystack, template)?;
    let cost = search.placements() * search.n as u64;
    let best = if cost <= EXHAUSTIVE_BUDGET {
        search.exhaustive()
    } else {
        search.coarse_to_fine(search.coarse_step())
    };
    Some(best.clamp(-1.0, 1.0) as f32)
}

struct Search {
    hay: Vec<f64>,
    hay_width: usize,
    tw: usize,
    th: usize,
    max_x: usize,
    max_y: usize,
    n: f64,
    t_mean: f64,
    t_centered: Vec<f64>,
    t_var: f64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Search {
    fn new(haystack: &GrayImage, template: &GrayImage) -> Option<Self> {
        let (hw, hh) = haystack.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw > hw || th > hh {
            return None;
        }

        let n = (tw * th) as f64;
        let t_mean = template.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
        let t_centered: Vec<f64> = template.pixels().map(|p| p.0[0] as f64 - t_mean).collect();
        let t_var: f64 = t_centered.iter().map(|v| v * v).sum();
        let (sum, sum_sq) = integral_images(haystack);

        Some(Self {
            hay: haystack.pixels().map(|p| p.0[0] as f64).collect(),
            hay_width: hw as usize,
            tw: tw as usize,
            th: th as usize,
            max_x: (hw - tw) as usize,
            max_y: (hh - th) as usize,
            n,
            t_mean,
            t_centered,
            t_var,
            sum,
            sum_sq,
        })
    }

    fn placements(&self) -> u64 {
        (self.max_x as u64 + 1) * (self.max_y as u64 + 1)
    }

    fn coarse_step(&self) -> usize {
        (self.tw.min(self.th) / 4).max(1)
    }

    fn window(&self, table: &[f64], x: usize, y: usize) -> f64 {
        let stride = self.hay_width + 1;
        let (x1, y1) = (x + self.tw, y + self.th);
        table[y1 * stride + x1] - table[y * stride + x1] - table[y1 * stride + x]
            + table[y * stride + x]
    }

    fn score(&self, x: usize, y: usize) -> f64 {
        let w_sum = self.window(&self.sum, x, y);
        let w_var = self.window(&self.sum_sq, x, y) - w_sum * w_sum / self.n;

        if self.t_var < FLAT_EPSILON || w_var < FLAT_EPSILON {
            // Correlation is undefined for flat patches; treat identical
            // flat patches as a match and everything else as unrelated.
            let same_level = self.t_var < FLAT_EPSILON
                && w_var < FLAT_EPSILON
                && (w_sum / self.n - self.t_mean).abs() < 1.0;
            return if same_level { 1.0 } else { 0.0 };
        }

        let mut cross = 0.0;
        for ty in 0..self.th {
            let row = &self.hay[(y + ty) * self.hay_width + x..][..self.tw];
            let t_row = &self.t_centered[ty * self.tw..][..self.tw];
            cross += row.iter().zip(t_row).map(|(p, t)| p * t).sum::<f64>();
        }
        cross / (w_var * self.t_var).sqrt()
    }

    fn exhaustive(&self) -> f64 {
        self.best_in(0, self.max_x, 0, self.max_y)
    }

    fn coarse_to_fine(&self, step: usize) -> f64 {
        let mut grid: Vec<(f64, usize, usize)> = Vec::new();
        for y in (0..=self.max_y).step_by(step) {
            for x in (0..=self.max_x).step_by(step) {
                grid.push((self.score(x, y), x, y));
            }
        }
        grid.sort_by(|a, b| b.0.total_cmp(&a.0));

        grid.iter()
            .take(COARSE_CANDIDATES)
            .map(|&(_, cx, cy)| {
                self.best_in(
                    cx.saturating_sub(step),
                    (cx + step).min(self.max_x),
                    cy.saturating_sub(step),
                    (cy + step).min(self.max_y),
                )
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn best_in(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> f64 {
        let mut best = f64::NEG_INFINITY;
        for y in y0..=y1 {
            for x in x0..=x1 {
                best = best.max(self.score(x, y));
            }
        }
        best
    }
}

/// Shrinks `haystack` and `template` by the same factor so the haystack has
/// at most `max_pixels` pixels. Keeps full-frame fallback ROIs affordable.
pub fn downscale_pair(
    haystack: &GrayImage,
    template: &GrayImage,
    max_pixels: u64,
) -> (GrayImage, GrayImage) {
    let area = haystack.width() as u64 * haystack.height() as u64;
    if max_pixels == 0 || area <= max_pixels {
        return (haystack.clone(), template.clone());
    }
    let factor = (max_pixels as f64 / area as f64).sqrt();
    let scale = |img: &GrayImage| {
        let w = ((img.width() as f64 * factor).round() as u32).max(1);
        let h = ((img.height() as f64 * factor).round() as u32).max(1);
        imageops::resize(img, w, h, FilterType::Triangle)
    };
    (scale(haystack), scale(template))
}

/// Summed-area tables of pixel values and squared values, `(w+1) x (h+1)`.
fn integral_images(img: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let stride = w + 1;
    let mut sum = vec![0.0; stride * (h + 1)];
    let mut sum_sq = vec![0.0; stride * (h + 1)];
    for y in 0..h {
        let (mut row, mut row_sq) = (0.0, 0.0);
        for x in 0..w {
            let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
            row += v;
            row_sq += v * v;
            sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
        }
    }
    (sum, sum_sq)
}
