//! Coordinate spaces and the mapper between them.
//!
//! Document space is fixed to one page with its origin at the bottom-left and
//! y growing upward. Viewport space is a scaled render of that page with its
//! origin at the top-left. Screen space is where the viewport bitmap is shown
//! on the device, which may differ in size (pixel density, CSS scaling).

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in document space; `(x, y)` is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Grows the rectangle by `amount` on every side.
    pub fn inflate(&self, amount: f32) -> Rect {
        Rect {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + amount * 2.0,
            height: self.height + amount * 2.0,
        }
    }

    /// Inclusive containment.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left()
            && point.x <= self.right()
            && point.y >= self.bottom()
            && point.y <= self.top()
    }

    pub fn contains_strictly(&self, point: Point) -> bool {
        point.x > self.left()
            && point.x < self.right()
            && point.y > self.bottom()
            && point.y < self.top()
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// RGBA colour, written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() || (hex.len() != 6 && hex.len() != 8) {
            return Err(anyhow!("invalid colour `{s}`, expected #rrggbb or #rrggbbaa"));
        }
        let channel = |idx: usize| {
            u8::from_str_radix(&hex[idx..idx + 2], 16)
                .map_err(|_| anyhow!("invalid colour `{s}`"))
        };
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }
}

/// Pixel size and scale of the current render of one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportDescriptor {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl ViewportDescriptor {
    /// Viewport for a page of `page_width` x `page_height` document units.
    pub fn for_page(page_width: f32, page_height: f32, scale: f32) -> Self {
        Self {
            width: page_width * scale,
            height: page_height * scale,
            scale,
        }
    }
}

/// Where a viewport bitmap is displayed, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateMapper {
    viewport: Option<ViewportDescriptor>,
    screen: Option<ScreenRect>,
}

impl CoordinateMapper {
    pub fn new(viewport: Option<ViewportDescriptor>) -> Self {
        Self {
            viewport,
            screen: None,
        }
    }

    pub fn with_screen(mut self, screen: ScreenRect) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn viewport(&self) -> Option<&ViewportDescriptor> {
        self.viewport.as_ref()
    }

    /// `false` until the page has been rendered; results are then `(0, 0)` and
    /// must be treated as a no-op.
    pub fn is_ready(&self) -> bool {
        self.viewport.map_or(false, |v| v.scale > 0.0)
    }

    /// Per-axis `viewport_size / screen_size`; identity without a screen rect.
    pub fn screen_to_viewport_ratio(&self) -> (f32, f32) {
        match (self.viewport, self.screen) {
            (Some(v), Some(s)) if s.width > 0.0 && s.height > 0.0 => {
                (v.width / s.width, v.height / s.height)
            }
            _ => (1.0, 1.0),
        }
    }

    pub fn screen_to_viewport(&self, screen_point: Point) -> Point {
        if !self.is_ready() {
            return Point::ORIGIN;
        }
        let (rx, ry) = self.screen_to_viewport_ratio();
        let (left, top) = self.screen.map_or((0.0, 0.0), |s| (s.left, s.top));
        Point::new((screen_point.x - left) * rx, (screen_point.y - top) * ry)
    }

    pub fn to_document(&self, screen_point: Point) -> Point {
        let Some(viewport) = self.viewport.filter(|v| v.scale > 0.0) else {
            return Point::ORIGIN;
        };
        let p = self.screen_to_viewport(screen_point);
        Point::new(p.x / viewport.scale, (viewport.height - p.y) / viewport.scale)
    }

    pub fn to_viewport(&self, document_point: Point) -> Point {
        let Some(viewport) = self.viewport.filter(|v| v.scale > 0.0) else {
            return Point::ORIGIN;
        };
        Point::new(
            document_point.x * viewport.scale,
            viewport.height - document_point.y * viewport.scale,
        )
    }

    pub fn to_screen(&self, document_point: Point) -> Point {
        if !self.is_ready() {
            return Point::ORIGIN;
        }
        let p = self.to_viewport(document_point);
        let (rx, ry) = self.screen_to_viewport_ratio();
        let (left, top) = self.screen.map_or((0.0, 0.0), |s| (s.left, s.top));
        Point::new(p.x / rx + left, p.y / ry + top)
    }

    /// Maps a document rectangle to a viewport rectangle whose `(x, y)` is the
    /// top-left corner.
    pub fn rect_to_viewport(&self, rect: Rect) -> Rect {
        if !self.is_ready() {
            return Rect::default();
        }
        let top_left = self.to_viewport(Point::new(rect.left(), rect.top()));
        let bottom_right = self.to_viewport(Point::new(rect.right(), rect.bottom()));
        Rect::new(
            top_left.x,
            top_left.y,
            bottom_right.x - top_left.x,
            bottom_right.y - top_left.y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn close(a: Point, b: Point) -> bool {
        let near = |l: f32, r: f32| (l - r).abs() <= 1e-3 * (1.0 + r.abs());
        near(a.x, b.x) && near(a.y, b.y)
    }

    #[test]
    fn flips_y_axis_and_scales() {
        let mapper = CoordinateMapper::new(Some(ViewportDescriptor::for_page(600.0, 800.0, 1.5)));
        let p = mapper.to_viewport(Point::new(100.0, 700.0));
        assert_eq!(p, Point::new(150.0, 1200.0 - 1050.0));
        assert_eq!(mapper.to_document(p), Point::new(100.0, 700.0));
    }

    #[test]
    fn round_trips_random_points() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let scale = rng.gen_range(0.1..6.0);
            let viewport = ViewportDescriptor::for_page(
                rng.gen_range(50.0..2000.0),
                rng.gen_range(50.0..2000.0),
                scale,
            );
            let mapper = CoordinateMapper::new(Some(viewport));
            let p = Point::new(rng.gen_range(-100.0..1500.0), rng.gen_range(-100.0..1500.0));
            assert!(close(mapper.to_document(mapper.to_viewport(p)), p));
        }
    }

    #[test]
    fn applies_screen_ratio_and_offset() {
        let viewport = ViewportDescriptor::for_page(500.0, 1000.0, 2.0);
        let screen = ScreenRect {
            left: 10.0,
            top: 20.0,
            width: 500.0,
            height: 1000.0,
        };
        let mapper = CoordinateMapper::new(Some(viewport)).with_screen(screen);
        assert_eq!(mapper.screen_to_viewport_ratio(), (2.0, 2.0));

        let doc = mapper.to_document(Point::new(60.0, 520.0));
        assert_eq!(doc, Point::new(50.0, 500.0));
        assert!(close(mapper.to_screen(doc), Point::new(60.0, 520.0)));
    }

    #[test]
    fn unrendered_page_maps_to_origin() {
        let mapper = CoordinateMapper::default();
        assert!(!mapper.is_ready());
        assert_eq!(mapper.to_document(Point::new(40.0, 40.0)), Point::ORIGIN);
        assert_eq!(mapper.to_viewport(Point::new(40.0, 40.0)), Point::ORIGIN);
    }

    #[test]
    fn rect_maps_to_top_left_origin() {
        let mapper = CoordinateMapper::new(Some(ViewportDescriptor::for_page(100.0, 100.0, 2.0)));
        let r = mapper.rect_to_viewport(Rect::new(10.0, 80.0, 20.0, 10.0));
        assert_eq!(r, Rect::new(20.0, 20.0, 40.0, 20.0));
    }

    #[test]
    fn colour_parses_and_prints_hex() {
        let c: Color = "#FF8000".parse().unwrap();
        assert_eq!(c, Color::rgb(255, 128, 0));
        assert_eq!(c.to_string(), "#ff8000");
        let translucent: Color = "#00000080".parse().unwrap();
        assert_eq!(translucent.a, 0x80);
        assert!("#12".parse::<Color>().is_err());
    }
}
