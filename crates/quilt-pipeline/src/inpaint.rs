//! Fast-marching inpainting.
//!
//! Masked pixels are filled in order of their distance `T` from the known
//! region, each one from a weighted average of already known pixels within
//! `radius`:
//!
//! - **Telea**: weights favor neighbors along the propagation direction
//!   (`∇T`), close by, and on the same level set of `T`.
//! - **Navier-Stokes**: weights favor neighbors lying along the isophote
//!   through them (perpendicular to the image gradient), so edges that run
//!   into the hole are continued rather than smeared.
//!
//! Mask semantics: nonzero means "fill this pixel". Known pixels are never
//! modified. A mask that covers the whole image leaves it unchanged.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::{GrayImage, Rgb, RgbImage};

/// Distance assigned to not-yet-reached pixels.
const FAR: f32 = 1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Known,
    Band,
    Inside,
}

/// How neighbor contributions are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Weighting {
    Telea,
    Isophote,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    t: f32,
    seq: u64,
    idx: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // Reversed so `BinaryHeap` pops the smallest `t` first, oldest first on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Marcher {
    width: i64,
    height: i64,
    flags: Vec<Flag>,
    t: Vec<f32>,
    pixels: Vec<[f32; 3]>,
    heap: BinaryHeap<Node>,
    seq: u64,
    radius: i64,
    weighting: Weighting,
}

const NEIGHBORS: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

impl Marcher {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn index(&self, x: i64, y: i64) -> Option<usize> {
        (x >= 0 && y >= 0 && x < self.width && y < self.height).then(|| (y * self.width + x) as usize)
    }

    /// Flag and distance at `(x, y)`; outside the image counts as unreached.
    fn at(&self, x: i64, y: i64) -> (Flag, f32) {
        self.index(x, y)
            .map_or((Flag::Inside, FAR), |i| (self.flags[i], self.t[i]))
    }

    fn push(&mut self, idx: usize, t: f32) {
        self.heap.push(Node { t, seq: self.seq, idx });
        self.seq += 1;
    }

    /// One quadrant of the eikonal update `|∇T| = 1`.
    fn solve(&self, a: (i64, i64), b: (i64, i64)) -> f32 {
        let (fa, ta) = self.at(a.0, a.1);
        let (fb, tb) = self.at(b.0, b.1);
        match (fa != Flag::Inside, fb != Flag::Inside) {
            (true, true) => {
                let diff = ta - tb;
                if diff.abs() >= 1.0 {
                    1.0 + ta.min(tb)
                } else {
                    (ta + tb + diff.mul_add(-diff, 2.0).sqrt()) * 0.5
                }
            }
            (true, false) => 1.0 + ta,
            (false, true) => 1.0 + tb,
            (false, false) => 1.0 + ta.min(tb),
        }
    }

    fn arrival_time(&self, x: i64, y: i64) -> f32 {
        [
            self.solve((x, y - 1), (x - 1, y)),
            self.solve((x, y - 1), (x + 1, y)),
            self.solve((x, y + 1), (x - 1, y)),
            self.solve((x, y + 1), (x + 1, y)),
        ]
        .into_iter()
        .fold(FAR, f32::min)
    }

    /// Finite-difference gradient of `value` at `(x, y)`, using only
    /// pixels that are not inside the hole.
    fn gradient(&self, x: i64, y: i64, value: impl Fn(usize) -> f32) -> (f32, f32) {
        let axis = |prev: (i64, i64), next: (i64, i64)| -> f32 {
            let here = self.index(x, y).map_or(0.0, &value);
            let sample = |p: (i64, i64)| {
                self.index(p.0, p.1)
                    .filter(|&i| self.flags[i] != Flag::Inside)
                    .map(&value)
            };
            match (sample(prev), sample(next)) {
                (Some(p), Some(n)) => (n - p) * 0.5,
                (None, Some(n)) => n - here,
                (Some(p), None) => here - p,
                (None, None) => 0.0,
            }
        };
        (axis((x - 1, y), (x + 1, y)), axis((x, y - 1), (x, y + 1)))
    }

    fn luminance(&self, idx: usize) -> f32 {
        let [r, g, b] = self.pixels[idx];
        0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g))
    }

    #[allow(clippy::cast_precision_loss)]
    fn fill_pixel(&self, x: i64, y: i64, idx: usize) -> [f32; 3] {
        let (gtx, gty) = self.gradient(x, y, |i| self.t[i]);
        let t_here = self.t[idx];

        let mut acc = [0.0f32; 3];
        let mut total = 0.0f32;
        let r = self.radius;
        for ky in (y - r)..=(y + r) {
            for kx in (x - r)..=(x + r) {
                let (rx, ry) = (x - kx, y - ky);
                let len2 = rx * rx + ry * ry;
                if len2 == 0 || len2 > r * r {
                    continue;
                }
                let Some(k) = self.index(kx, ky) else {
                    continue;
                };
                if self.flags[k] == Flag::Inside {
                    continue;
                }

                let (rx, ry, len2) = (rx as f32, ry as f32, len2 as f32);
                let dst = 1.0 / (len2 * len2.sqrt());
                let lev = 1.0 / (1.0 + (self.t[k] - t_here).abs());
                let dir = match self.weighting {
                    Weighting::Telea => {
                        let d = rx.mul_add(gtx, ry * gty);
                        if d.abs() <= 0.01 { 1.0e-6 } else { d }
                    }
                    Weighting::Isophote => {
                        let (gix, giy) = self.gradient(kx, ky, |i| self.luminance(i));
                        let norm = gix.hypot(giy);
                        if norm < 1.0e-3 {
                            1.0
                        } else {
                            (rx.mul_add(giy, -(ry * gix)).abs() / (len2.sqrt() * norm)).max(1.0e-6)
                        }
                    }
                };
                let w = (dir * dst * lev).abs();
                for (a, v) in acc.iter_mut().zip(self.pixels[k]) {
                    *a += w * v;
                }
                total += w;
            }
        }

        if total > 0.0 {
            acc.map(|a| a / total)
        } else {
            self.pixels[idx]
        }
    }

    fn run(&mut self) {
        while let Some(node) = self.heap.pop() {
            self.flags[node.idx] = Flag::Known;
            let x = i64::try_from(node.idx).unwrap_or(0) % self.width;
            let y = i64::try_from(node.idx).unwrap_or(0) / self.width;
            for (dx, dy) in NEIGHBORS {
                let (nx, ny) = (x + dx, y + dy);
                let Some(n) = self.index(nx, ny) else {
                    continue;
                };
                if self.flags[n] != Flag::Inside {
                    continue;
                }
                let t = self.arrival_time(nx, ny);
                self.t[n] = t;
                self.pixels[n] = self.fill_pixel(nx, ny, n);
                self.flags[n] = Flag::Band;
                self.push(n, t);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fast_march(image: &RgbImage, mask: &GrayImage, radius: u32, weighting: Weighting) -> RgbImage {
    let (w, h) = image.dimensions();
    if mask.dimensions() != (w, h) || w == 0 || h == 0 {
        return image.clone();
    }

    let flags: Vec<Flag> = mask
        .pixels()
        .map(|p| if p.0[0] == 0 { Flag::Known } else { Flag::Inside })
        .collect();
    if flags.iter().all(|&f| f == Flag::Known) || flags.iter().all(|&f| f == Flag::Inside) {
        return image.clone();
    }
    let t = flags
        .iter()
        .map(|&f| if f == Flag::Inside { FAR } else { 0.0 })
        .collect();

    let mut marcher = Marcher {
        width: i64::from(w),
        height: i64::from(h),
        flags,
        t,
        pixels: image.pixels().map(|p| p.0.map(f32::from)).collect(),
        heap: BinaryHeap::new(),
        seq: 0,
        radius: i64::from(radius.max(1)),
        weighting,
    };

    // Initial band: known pixels touching the hole.
    for y in 0..marcher.height {
        for x in 0..marcher.width {
            let Some(idx) = marcher.index(x, y) else {
                continue;
            };
            if marcher.flags[idx] != Flag::Known {
                continue;
            }
            let touches_hole = NEIGHBORS.iter().any(|&(dx, dy)| {
                marcher
                    .index(x + dx, y + dy)
                    .is_some_and(|n| marcher.flags[n] == Flag::Inside)
            });
            if touches_hole {
                marcher.flags[idx] = Flag::Band;
                marcher.push(idx, 0.0);
            }
        }
    }

    marcher.run();

    let mut out = image.clone();
    for ((dst, src), m) in out.pixels_mut().zip(&marcher.pixels).zip(mask.pixels()) {
        if m.0[0] != 0 {
            *dst = Rgb(src.map(|v| v.round().clamp(0.0, 255.0) as u8));
        }
    }
    out
}

/// Telea fast-marching inpainting of the nonzero pixels of `mask`.
#[must_use = "returns the inpainted image"]
pub fn inpaint_telea(image: &RgbImage, mask: &GrayImage, radius: u32) -> RgbImage {
    fast_march(image, mask, radius, Weighting::Telea)
}

/// Isophote-following inpainting of the nonzero pixels of `mask`.
#[must_use = "returns the inpainted image"]
pub fn inpaint_navier_stokes(image: &RgbImage, mask: &GrayImage, radius: u32) -> RgbImage {
    fast_march(image, mask, radius, Weighting::Isophote)
}
