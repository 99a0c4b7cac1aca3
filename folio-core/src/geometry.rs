use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, `(x, y)` being its top-left corner.
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

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Same rectangle with negative extents folded back into positive ones.
    pub fn normalized(&self) -> Self {
        let (x, width) = if self.width < 0.0 {
            (self.x + self.width, -self.width)
        } else {
            (self.x, self.width)
        };
        let (y, height) = if self.height < 0.0 {
            (self.y + self.height, -self.height)
        } else {
            (self.y, self.height)
        };
        Self::new(x, y, width, height)
    }

    /// Height of the vertical overlap between two rectangles.
    pub fn vertical_overlap(&self, other: &Rect) -> f32 {
        (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0)
    }

    pub fn scaled(&self, scale: f32) -> Self {
        Self::new(
            self.x * scale,
            self.y * scale,
            self.width * scale,
            self.height * scale,
        )
    }
}

/// 2D affine transform `[a b c d e f]` as found on extracted text runs.
///
/// `(a, b, c, d)` is the linear part and `(e, f)` the translation, so a point
/// `(x, y)` maps to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Pure translation with a uniform font size, the common shape of
    /// unrotated text.
    pub fn text_at(font_size: f32, x: f32, y: f32) -> Self {
        Self::new(font_size, 0.0, 0.0, font_size, x, y)
    }

    pub fn translation(&self) -> Point {
        Point::new(self.e, self.f)
    }

    /// Length of the transformed x unit vector. For text this is the font
    /// size, which doubles as a line-height proxy.
    pub fn scale_factor(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn apply(&self, point: Point) -> Point {
        Point::new(
            self.a * point.x + self.c * point.y + self.e,
            self.b * point.x + self.d * point.y + self.f,
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Intrinsic page size in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scaled(&self, scale: f32) -> (f32, f32) {
        (self.width * scale, self.height * scale)
    }
}

/// Maps a document-space point into viewport pixels.
pub fn to_viewport(doc_x: f32, doc_y: f32, page_height: f32, scale: f32) -> (f32, f32) {
    (doc_x * scale, (page_height - doc_y) * scale)
}

/// Inverse of [`to_viewport`]. Returns `None` for a non-positive scale.
pub fn to_document(vp_x: f32, vp_y: f32, page_height: f32, scale: f32) -> Option<(f32, f32)> {
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    Some((vp_x / scale, page_height - vp_y / scale))
}

/// A rectangle anchored on a document-space baseline: `origin` is the
/// bottom-left corner in document coordinates (y up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentRect {
    pub origin: Point,
    pub width: f32,
    pub height: f32,
    pub page_height: f32,
}

impl DocumentRect {
    pub fn new(origin: Point, width: f32, height: f32, page_height: f32) -> Self {
        Self {
            origin,
            width,
            height,
            page_height,
        }
    }

    /// Viewport rectangle at `scale`; its top edge sits `height` above the
    /// mapped baseline.
    pub fn to_viewport(&self, scale: f32) -> Rect {
        let (x, baseline) = to_viewport(self.origin.x, self.origin.y, self.page_height, scale);
        let height = self.height * scale;
        Rect::new(x, baseline - height, self.width * scale, height)
    }

    /// Builds a document rectangle from one drawn in the viewport at `scale`.
    pub fn from_viewport(rect: Rect, page_height: f32, scale: f32) -> Option<Self> {
        let rect = rect.normalized();
        let (x, baseline) = to_document(rect.x, rect.bottom(), page_height, scale)?;
        Some(Self::new(
            Point::new(x, baseline),
            rect.width / scale,
            rect.height / scale,
            page_height,
        ))
    }
}
