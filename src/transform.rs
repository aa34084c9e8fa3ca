/// Content fit modes for placing a frame inside its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentFit {
    /// Scale to fit entirely inside the bounds, keeping the aspect ratio.
    #[default]
    Contain,
    /// Scale to cover the bounds, keeping the aspect ratio (may crop).
    Cover,
    /// Stretch to the bounds.
    Fill,
    /// Like `Contain`, but never scale up.
    ScaleDown,
    /// Natural size, centered.
    None,
}

/// 2D affine transform applied to the final draw.
///
/// Stored as `[a, b, c, d, tx, ty]`, mapping `(x, y)` to
/// `(a*x + c*y + tx, b*x + d*y + ty)`. The pipeline never resamples pixels;
/// backends apply this when they submit the draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform([f32; 6]);

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }

    pub const fn translate(tx: f32, ty: f32) -> Self {
        Self([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    /// Counter-clockwise rotation by `radians` about the origin.
    pub fn rotate(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self([cos, sin, -sin, cos, 0.0, 0.0])
    }

    pub fn matrix(&self) -> [f32; 6] {
        self.0
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        let [a1, b1, c1, d1, x1, y1] = self.0;
        let [a2, b2, c2, d2, x2, y2] = next.0;
        Transform([
            a2 * a1 + c2 * b1,
            b2 * a1 + d2 * b1,
            a2 * c1 + c2 * d1,
            b2 * c1 + d2 * d1,
            a2 * x1 + c2 * y1 + x2,
            b2 * x1 + d2 * y1 + y2,
        ])
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, tx, ty] = self.0;
        (a * x + c * y + tx, b * x + d * y + ty)
    }

    /// Place `content` (width, height) inside `bounds` according to `fit`,
    /// centering whatever does not fill the bounds exactly.
    pub fn fit(fit: ContentFit, content: (f32, f32), bounds: (f32, f32)) -> Transform {
        let (cw, ch) = content;
        let (bw, bh) = bounds;
        if cw <= 0.0 || ch <= 0.0 {
            return Transform::identity();
        }

        let (sx, sy) = match fit {
            ContentFit::Fill => (bw / cw, bh / ch),
            ContentFit::Contain => {
                let s = (bw / cw).min(bh / ch);
                (s, s)
            }
            ContentFit::Cover => {
                let s = (bw / cw).max(bh / ch);
                (s, s)
            }
            ContentFit::ScaleDown => {
                let s = (bw / cw).min(bh / ch).min(1.0);
                (s, s)
            }
            ContentFit::None => (1.0, 1.0),
        };

        let offset_x = (bw - cw * sx) / 2.0;
        let offset_y = (bh - ch * sy) / 2.0;
        Transform::scale(sx, sy).then(&Transform::translate(offset_x, offset_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4
    }

    #[test]
    fn test_contain_letterboxes() {
        let t = Transform::fit(ContentFit::Contain, (1920.0, 1080.0), (960.0, 960.0));
        assert!(close(t.apply(0.0, 0.0), (0.0, 210.0)));
        assert!(close(t.apply(1920.0, 1080.0), (960.0, 750.0)));
    }

    #[test]
    fn test_cover_crops() {
        let t = Transform::fit(ContentFit::Cover, (100.0, 50.0), (100.0, 100.0));
        assert!(close(t.apply(0.0, 0.0), (-50.0, 0.0)));
        assert!(close(t.apply(100.0, 50.0), (150.0, 100.0)));
    }

    #[test]
    fn test_scale_down_never_enlarges() {
        let t = Transform::fit(ContentFit::ScaleDown, (10.0, 10.0), (100.0, 100.0));
        assert!(close(t.apply(0.0, 0.0), (45.0, 45.0)));
        assert!(close(t.apply(10.0, 10.0), (55.0, 55.0)));
    }

    #[test]
    fn test_then_applies_in_order() {
        let t =
            Transform::rotate(std::f32::consts::FRAC_PI_2).then(&Transform::translate(10.0, 0.0));
        assert!(close(t.apply(1.0, 0.0), (10.0, 1.0)));
        assert_eq!(Transform::default(), Transform::identity());
    }
}
