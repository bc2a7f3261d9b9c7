//! Coordinate geometry shared by every detector.
//!
//! Detectors run at different input resolutions (300x300 face detection,
//! 500x500 landmark working space, 192x192 face mesh, ...). Each resize
//! produces a [`CoordinateFrame`] holding the affine parameters needed to
//! move points between the model's input space and the source image:
//!
//! ```text
//! resized = source * scale + pad
//! source  = (resized - pad) / scale
//! ```

use image::{imageops, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Border fill used by padded resizes (mid grey).
pub const PAD_FILL: Rgb<u8> = Rgb([114, 114, 114]);

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("cannot resize {source_width}x{source_height} into {target_width}x{target_height}")]
    ZeroDimension {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
    },

    #[error("region {0:?} does not overlap the image")]
    EmptyRegion(Rect),
}

/// 2-D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    /// Centroid of a non-empty point set
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Image or canvas dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(top_left: Point, bottom_right: Point) -> Self {
        Self::new(
            top_left.x,
            top_left.y,
            bottom_right.x - top_left.x,
            bottom_right.y - top_left.y,
        )
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x + self.width, self.y + self.height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.y >= self.y && p.x <= self.x + self.width && p.y <= self.y + self.height
    }

    /// Whole-pixel bounds `(x, y, width, height)` inside `bounds`, or `None`
    /// when nothing of the rectangle survives clipping.
    pub fn pixel_bounds(&self, bounds: Size) -> Option<(u32, u32, u32, u32)> {
        let clipped = clip_rect(*self, bounds);
        let x0 = clipped.x.floor() as u32;
        let y0 = clipped.y.floor() as u32;
        let x1 = (clipped.x + clipped.width).ceil().min(bounds.width as f32) as u32;
        let y1 = (clipped.y + clipped.height).ceil().min(bounds.height as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Affine parameters of one resize-with-padding operation.
///
/// Invariants: `scale > 0`, `0 <= pad_x < canvas.width`,
/// `0 <= pad_y < canvas.height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    pub pad_x: f32,
    pub pad_y: f32,
    pub scale: f32,
    /// Size of the resized content (before padding)
    pub content: Size,
    /// Size of the output buffer; equals `content` for unpadded resizes
    pub canvas: Size,
}

impl CoordinateFrame {
    /// Compute the frame for fitting `source` into `target`, preserving the
    /// aspect ratio. With `pad` the content is centred on a `target` canvas;
    /// without it the canvas is the content itself and the pads are zero.
    pub fn fit(source: Size, target: Size, pad: bool) -> Result<Self, GeometryError> {
        if source.is_empty() || target.is_empty() {
            return Err(GeometryError::ZeroDimension {
                source_width: source.width,
                source_height: source.height,
                target_width: target.width,
                target_height: target.height,
            });
        }

        let (sw, sh) = (source.width as u64, source.height as u64);
        let (tw, th) = (target.width as u64, target.height as u64);

        // Compare tw/sw against th/sh in integers so the limiting side lands
        // exactly on the target dimension.
        let (content_w, content_h, scale) = if tw * sh <= th * sw {
            let h = ((sh * tw) / sw).max(1);
            (tw, h, target.width as f32 / source.width as f32)
        } else {
            let w = ((sw * th) / sh).max(1);
            (w, th, target.height as f32 / source.height as f32)
        };
        let content = Size::new(content_w as u32, content_h as u32);

        if !pad {
            return Ok(Self {
                pad_x: 0.0,
                pad_y: 0.0,
                scale,
                content,
                canvas: content,
            });
        }

        let left = (target.width - content.width) / 2;
        let top = (target.height - content.height) / 2;
        Ok(Self {
            pad_x: left as f32,
            pad_y: top as f32,
            scale,
            content,
            canvas: target,
        })
    }

    /// Identity mapping for a canvas that is the source itself
    pub fn identity(size: Size) -> Self {
        Self {
            pad_x: 0.0,
            pad_y: 0.0,
            scale: 1.0,
            content: size,
            canvas: size,
        }
    }

    /// Model-space point to source-space point
    pub fn to_source(&self, p: Point) -> Point {
        Point::new((p.x - self.pad_x) / self.scale, (p.y - self.pad_y) / self.scale)
    }

    /// Source-space point to model-space point
    pub fn to_target(&self, p: Point) -> Point {
        Point::new(p.x * self.scale + self.pad_x, p.y * self.scale + self.pad_y)
    }

    pub fn rect_to_source(&self, r: Rect) -> Rect {
        Rect::from_corners(self.to_source(r.top_left()), self.to_source(r.bottom_right()))
    }

    pub fn rect_to_target(&self, r: Rect) -> Rect {
        Rect::from_corners(self.to_target(r.top_left()), self.to_target(r.bottom_right()))
    }
}

/// Aspect-preserving resize of the whole image, optionally padded to `target`.
pub fn resize_with_padding(
    image: &RgbImage,
    target: Size,
    pad: bool,
) -> Result<(RgbImage, CoordinateFrame), GeometryError> {
    let frame = CoordinateFrame::fit(Size::of(image), target, pad)?;
    let resized = imageops::resize(
        image,
        frame.content.width,
        frame.content.height,
        imageops::FilterType::Triangle,
    );

    if !pad {
        return Ok((resized, frame));
    }

    let mut canvas = RgbImage::from_pixel(frame.canvas.width, frame.canvas.height, PAD_FILL);
    imageops::replace(&mut canvas, &resized, frame.pad_x as i64, frame.pad_y as i64);
    Ok((canvas, frame))
}

/// Same as [`resize_with_padding`] applied to `region` of `image`.
///
/// The returned frame maps between the canvas and the *region's* own
/// coordinates; add `region.top_left()` to reach image coordinates.
pub fn resize_region_with_padding(
    image: &RgbImage,
    region: Rect,
    target: Size,
    pad: bool,
) -> Result<(RgbImage, CoordinateFrame, Rect), GeometryError> {
    let (x, y, w, h) = region
        .pixel_bounds(Size::of(image))
        .ok_or(GeometryError::EmptyRegion(region))?;
    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    let (canvas, frame) = resize_with_padding(&crop, target, pad)?;
    Ok((canvas, frame, Rect::new(x as f32, y as f32, w as f32, h as f32)))
}

/// Saturating clamp of a point into `[0, width) x [0, height)`.
pub fn clip_point(p: Point, bounds: Size) -> Point {
    let max_x = (bounds.width as f32 - 1.0).max(0.0);
    let max_y = (bounds.height as f32 - 1.0).max(0.0);
    Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y))
}

/// Saturating clamp of a rectangle so it covers no pixel outside `bounds`.
pub fn clip_rect(r: Rect, bounds: Size) -> Rect {
    let (w, h) = (bounds.width as f32, bounds.height as f32);
    let x0 = r.x.clamp(0.0, w);
    let y0 = r.y.clamp(0.0, h);
    let x1 = (r.x + r.width).clamp(0.0, w);
    let y1 = (r.y + r.height).clamp(0.0, h);
    Rect::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
}

/// Grow `rect` into a square (longer side wins), add `margin` of that side
/// on every edge, and keep the result centred on the original centre while
/// staying inside `bounds`. Clipping is symmetric so the output is always a
/// square sharing the input's centre.
pub fn expand_box_to_square_with_margin(rect: Rect, bounds: Size, margin: f32) -> Rect {
    let side = rect.width.max(rect.height) * (1.0 + 2.0 * margin.max(0.0));
    let (w, h) = (bounds.width as f32, bounds.height as f32);
    let c = rect.center();
    let c = Point::new(c.x.clamp(0.0, w), c.y.clamp(0.0, h));

    let half = (side / 2.0)
        .min(c.x)
        .min(c.y)
        .min(w - c.x)
        .min(h - c.y)
        .max(0.0);

    Rect::new(c.x - half, c.y - half, 2.0 * half, 2.0 * half)
}
