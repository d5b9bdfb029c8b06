//! Rectangle regions
//!
//! A [`Region`] is a set of pixels described as a list of non-overlapping
//! rectangles in y-x banded form: rectangles are grouped into horizontal
//! bands that share the same vertical extent, bands are sorted top to bottom,
//! and rectangles inside a band are sorted left to right with no two of them
//! touching. Vertically adjacent bands with identical horizontal spans are
//! coalesced, which makes the representation canonical so two regions cover
//! the same pixels exactly when their rectangle lists are equal.
//!
//! Regions are plain values. Every operation either returns a new region or
//! mutates `self` in place; dropping a region frees it.
//!
//! # Usage
//!
//! ```
//! use lucent::region::Region;
//!
//! let mut damage = Region::from_xywh(0, 0, 50, 50);
//! damage.union_with(&Region::from_xywh(10, 10, 50, 50));
//! assert_eq!(damage.area(), 50 * 50 * 2 - 40 * 40);
//! ```

use crate::types::{IBox, IVec2, Vec2};

/// A rectangle with inclusive top-left and exclusive bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Converts a box into a rectangle, saturating the far corner.
    pub fn from_box(b: IBox) -> Self {
        Self {
            x1: b.origin.x,
            y1: b.origin.y,
            x2: b.origin.x.saturating_add(b.size.x),
            y2: b.origin.y.saturating_add(b.size.y),
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn to_box(self) -> IBox {
        IBox::from_xywh(self.x1, self.y1, self.width(), self.height())
    }
}

/// A set of pixels, stored as banded rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Region {
    rects: Vec<Rect>,
}

/// Horizontal band of a region: `rects[start..end]` all span `y1..y2`.
#[derive(Debug, Clone, Copy)]
struct Band {
    y1: i32,
    y2: i32,
    start: usize,
    end: usize,
}

/// Accumulates bands top to bottom, coalescing identical neighbours.
struct BandWriter {
    rects: Vec<Rect>,
    last_band: Option<(usize, i32)>,
}

impl BandWriter {
    fn new() -> Self {
        Self {
            rects: Vec::new(),
            last_band: None,
        }
    }

    fn push(&mut self, y1: i32, y2: i32, spans: &[(i32, i32)]) {
        if spans.is_empty() || y2 <= y1 {
            return;
        }
        if let Some((start, last_y2)) = self.last_band {
            let last = &self.rects[start..];
            let same = last_y2 == y1
                && last.len() == spans.len()
                && last
                    .iter()
                    .zip(spans)
                    .all(|(r, &(x1, x2))| r.x1 == x1 && r.x2 == x2);
            if same {
                for r in &mut self.rects[start..] {
                    r.y2 = y2;
                }
                self.last_band = Some((start, y2));
                return;
            }
        }
        let start = self.rects.len();
        self.rects
            .extend(spans.iter().map(|&(x1, x2)| Rect::new(x1, y1, x2, y2)));
        self.last_band = Some((start, y2));
    }

    fn finish(self) -> Region {
        Region { rects: self.rects }
    }
}

/// Merges a sorted list of spans, joining overlapping and touching ones.
fn merge_spans(spans: &mut Vec<(i32, i32)>) {
    spans.sort_unstable();
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(spans.len());
    for &(x1, x2) in spans.iter() {
        if x2 <= x1 {
            continue;
        }
        match out.last_mut() {
            Some(last) if x1 <= last.1 => last.1 = last.1.max(x2),
            _ => out.push((x1, x2)),
        }
    }
    *spans = out;
}

/// Combines two sorted span lists with a boolean operator on coverage.
fn combine_spans(a: &[Rect], b: &[Rect], keep: fn(bool, bool) -> bool) -> Vec<(i32, i32)> {
    let mut xs: Vec<i32> = Vec::with_capacity((a.len() + b.len()) * 2);
    for r in a.iter().chain(b) {
        xs.push(r.x1);
        xs.push(r.x2);
    }
    xs.sort_unstable();
    xs.dedup();

    let mut out: Vec<(i32, i32)> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    for w in xs.windows(2) {
        let (x1, x2) = (w[0], w[1]);
        while ia < a.len() && a[ia].x2 <= x1 {
            ia += 1;
        }
        while ib < b.len() && b[ib].x2 <= x1 {
            ib += 1;
        }
        let in_a = ia < a.len() && a[ia].x1 <= x1;
        let in_b = ib < b.len() && b[ib].x1 <= x1;
        if !keep(in_a, in_b) {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.1 == x1 => last.1 = x2,
            _ => out.push((x1, x2)),
        }
    }
    out
}

impl Region {
    /// Creates an empty region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a region covering a single rectangle.
    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            return Self::new();
        }
        Self { rects: vec![rect] }
    }

    pub fn from_box(b: IBox) -> Self {
        Self::from_rect(Rect::from_box(b))
    }

    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::from_box(IBox::from_xywh(x, y, width, height))
    }

    /// Builds a region from arbitrary, possibly overlapping rectangles.
    pub fn from_rects<I>(rects: I) -> Self
    where
        I: IntoIterator<Item = Rect>,
    {
        let rects: Vec<Rect> = rects.into_iter().filter(|r| !r.is_empty()).collect();
        if rects.len() <= 1 {
            return Self { rects };
        }
        let mut ys: Vec<i32> = rects.iter().flat_map(|r| [r.y1, r.y2]).collect();
        ys.sort_unstable();
        ys.dedup();

        let mut writer = BandWriter::new();
        let mut spans = Vec::new();
        for w in ys.windows(2) {
            let (y1, y2) = (w[0], w[1]);
            spans.clear();
            spans.extend(
                rects
                    .iter()
                    .filter(|r| r.y1 <= y1 && r.y2 >= y2)
                    .map(|r| (r.x1, r.x2)),
            );
            merge_spans(&mut spans);
            writer.push(y1, y2, &spans);
        }
        writer.finish()
    }

    /// The rectangles making up this region, in banded order.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Smallest rectangle containing the whole region.
    pub fn extents(&self) -> Rect {
        let (Some(first), Some(last)) = (self.rects.first(), self.rects.last()) else {
            return Rect::default();
        };
        let x1 = self.rects.iter().map(|r| r.x1).min().unwrap_or(0);
        let x2 = self.rects.iter().map(|r| r.x2).max().unwrap_or(0);
        Rect::new(x1, first.y1, x2, last.y2)
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.rects
            .iter()
            .map(|r| r.width() as u64 * r.height() as u64)
            .sum()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects
            .iter()
            .any(|r| x >= r.x1 && x < r.x2 && y >= r.y1 && y < r.y2)
    }

    /// Returns true if every pixel of `rect` is in this region.
    pub fn contains_rect(&self, rect: Rect) -> bool {
        Region::from_rect(rect).subtract(self).is_empty()
    }

    fn bands(&self) -> Vec<Band> {
        let mut bands: Vec<Band> = Vec::new();
        for (i, r) in self.rects.iter().enumerate() {
            match bands.last_mut() {
                Some(band) if band.y1 == r.y1 => band.end = i + 1,
                _ => bands.push(Band {
                    y1: r.y1,
                    y2: r.y2,
                    start: i,
                    end: i + 1,
                }),
            }
        }
        bands
    }

    fn combine(&self, other: &Region, keep: fn(bool, bool) -> bool) -> Region {
        let bands_a = self.bands();
        let bands_b = other.bands();
        let mut ys: Vec<i32> = bands_a
            .iter()
            .chain(&bands_b)
            .flat_map(|b| [b.y1, b.y2])
            .collect();
        ys.sort_unstable();
        ys.dedup();

        let mut writer = BandWriter::new();
        let (mut ia, mut ib) = (0, 0);
        for w in ys.windows(2) {
            let (y1, y2) = (w[0], w[1]);
            while ia < bands_a.len() && bands_a[ia].y2 <= y1 {
                ia += 1;
            }
            while ib < bands_b.len() && bands_b[ib].y2 <= y1 {
                ib += 1;
            }
            let spans_a = match bands_a.get(ia) {
                Some(band) if band.y1 <= y1 => &self.rects[band.start..band.end],
                _ => &[],
            };
            let spans_b = match bands_b.get(ib) {
                Some(band) if band.y1 <= y1 => &other.rects[band.start..band.end],
                _ => &[],
            };
            if spans_a.is_empty() && spans_b.is_empty() {
                continue;
            }
            let spans = combine_spans(spans_a, spans_b, keep);
            writer.push(y1, y2, &spans);
        }
        writer.finish()
    }

    pub fn union(&self, other: &Region) -> Region {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        self.combine(other, |a, b| a || b)
    }

    pub fn intersect(&self, other: &Region) -> Region {
        if self.is_empty() || other.is_empty() {
            return Region::new();
        }
        self.combine(other, |a, b| a && b)
    }

    pub fn subtract(&self, other: &Region) -> Region {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        self.combine(other, |a, b| a && !b)
    }

    /// Pixels in exactly one of the two regions.
    pub fn xor(&self, other: &Region) -> Region {
        self.combine(other, |a, b| a != b)
    }

    pub fn union_with(&mut self, other: &Region) {
        if !other.is_empty() {
            *self = self.union(other);
        }
    }

    pub fn intersect_with(&mut self, other: &Region) {
        *self = self.intersect(other);
    }

    pub fn subtract_with(&mut self, other: &Region) {
        if !other.is_empty() && !self.is_empty() {
            *self = self.subtract(other);
        }
    }

    pub fn union_rect(&mut self, rect: Rect) {
        self.union_with(&Region::from_rect(rect));
    }

    pub fn intersect_rect(&mut self, rect: Rect) {
        self.intersect_with(&Region::from_rect(rect));
    }

    /// Moves every rectangle by `delta`, saturating at the coordinate range.
    pub fn translate(&mut self, delta: IVec2) {
        if delta == IVec2::ZERO {
            return;
        }
        for r in &mut self.rects {
            r.x1 = r.x1.saturating_add(delta.x);
            r.x2 = r.x2.saturating_add(delta.x);
            r.y1 = r.y1.saturating_add(delta.y);
            r.y2 = r.y2.saturating_add(delta.y);
        }
        self.rects.retain(|r| !r.is_empty());
    }

    pub fn translated(&self, delta: IVec2) -> Region {
        let mut out = self.clone();
        out.translate(delta);
        out
    }

    /// Scales the region about `origin`. Near edges round down and far
    /// edges round up, so the result always covers the scaled pixels.
    pub fn scale(&mut self, origin: IVec2, scale: Vec2) {
        if scale.is_identity() || self.is_empty() {
            return;
        }
        let scale_edge = |v: i32, o: i32, s: f64, ceil: bool| -> i32 {
            let scaled = (v as f64 - o as f64) * s;
            let rounded = if ceil { scaled.ceil() } else { scaled.floor() };
            (o as f64 + rounded).clamp(i32::MIN as f64, i32::MAX as f64) as i32
        };
        let scaled = self.rects.iter().map(|r| {
            Rect::new(
                scale_edge(r.x1, origin.x, scale.x, false),
                scale_edge(r.y1, origin.y, scale.y, false),
                scale_edge(r.x2, origin.x, scale.x, true),
                scale_edge(r.y2, origin.y, scale.y, true),
            )
        });
        *self = Region::from_rects(scaled.collect::<Vec<_>>());
    }

    /// Grows every rectangle by `dx` horizontally and `dy` vertically on
    /// each side. Negative amounts are treated as zero.
    pub fn dilate(&mut self, dx: i32, dy: i32) {
        let (dx, dy) = (dx.max(0), dy.max(0));
        if (dx == 0 && dy == 0) || self.is_empty() {
            return;
        }
        let grown: Vec<Rect> = self
            .rects
            .iter()
            .map(|r| {
                Rect::new(
                    r.x1.saturating_sub(dx),
                    r.y1.saturating_sub(dy),
                    r.x2.saturating_add(dx),
                    r.y2.saturating_add(dy),
                )
            })
            .collect();
        *self = Region::from_rects(grown);
    }

    pub fn dilated(&self, dx: i32, dy: i32) -> Region {
        let mut out = self.clone();
        out.dilate(dx, dy);
        out
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

impl From<IBox> for Region {
    fn from(b: IBox) -> Self {
        Region::from_box(b)
    }
}
