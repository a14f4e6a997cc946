//! What the capture code needs from a rendering backend.
//!
//! Window coordinates have their origin at the bottom left pixel center with y pointing up.
//! Window depth is normalized device depth remapped to `[0, 1]`; a depth of exactly
//! [BACKGROUND_DEPTH] means no geometry was drawn at that pixel.

use cgmath::{Basis3, Point2, Point3, Vector2, Vector3};
use image::RgbImage;

/// Depth buffer value of pixels without geometry.
pub const BACKGROUND_DEPTH: f32 = 1.0;

/// A rasterizer that can tell us about its current view.
pub trait Renderer {
    /// Window size in pixels as `(width, height)`.
    fn window_size(&self) -> (usize, usize);

    /// Focal length in pixels along x and y.
    fn focal_length(&self) -> Vector2<f64>;

    /// Principal point in image (y down) pixel coordinates.
    fn principal_point(&self) -> Point2<f64>;

    /// Near and far clip plane distances.
    fn clip(&self) -> (f64, f64);

    /// Current world to camera transform `(R, t)` with `p_camera = R p + t`.
    fn view_pose(&self) -> (Basis3<f64>, Vector3<f64>);

    /// Depth buffer value at window pixel `(x, y)`.
    fn depth(&self, x: usize, y: usize) -> f32;

    /// Convert a world point to window coordinates `(x, y, depth)`.
    fn to_window_coords(&self, p: &Point3<f64>) -> Point3<f64>;

    /// Color image of the current frame, top row first.
    fn screenshot(&self) -> RgbImage;
}

/// Window depth of a point `z` units in front of the camera.
pub fn window_depth(z: f64, near: f64, far: f64) -> f64 {
    let ndc = (far + near) / (far - near) - 2.0 * far * near / ((far - near) * z);
    (ndc + 1.0) / 2.0
}

/// Distance along the optical axis for a window depth `d`. Inverse of [window_depth].
pub fn metric_depth(d: f64, near: f64, far: f64) -> f64 {
    let ndc = 2.0 * d - 1.0;
    2.0 * near * far / (far + near - ndc * (far - near))
}

/// Ideal pinhole projection of a camera space point into window coordinates.
pub fn camera_to_window(
    p: Point3<f64>,
    focal: Vector2<f64>,
    principal_point: Point2<f64>,
    height: usize,
    (near, far): (f64, f64),
) -> Point3<f64> {
    let u = focal.x * p.x / p.z + principal_point.x;
    let v = focal.y * p.y / p.z + principal_point.y;
    Point3::new(u, (height as f64 - 1.0) - v, window_depth(p.z, near, far))
}

#[test]
fn test_metric_depth_inverts_window_depth() {
    for z in &[0.1, 0.5, 3.0, 42.0, 100.0] {
        let d = window_depth(*z, 0.1, 100.0);
        assert!((metric_depth(d, 0.1, 100.0) - z).abs() < 1e-9 * z.max(1.0));
    }
    assert!(window_depth(0.1, 0.1, 100.0).abs() < 1e-12);
    assert!((window_depth(100.0, 0.1, 100.0) - 1.0).abs() < 1e-12);
}

#[test]
fn test_metric_depth_half() {
    let m = metric_depth(0.5, 0.1, 100.0);
    assert!((m - 2.0 * 0.1 * 100.0 / 100.1).abs() < 1e-12);
    assert!((m - 0.1998).abs() < 1e-4);
}

/// Renderer backed by a hand written depth buffer.
#[cfg(test)]
pub(crate) struct FixedRenderer {
    pub width: usize,
    pub height: usize,
    pub focal: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub near: f64,
    pub far: f64,
    pub depth: Vec<f32>,
    pub image: RgbImage,
    pub depth_queries: std::cell::Cell<usize>,
}

#[cfg(test)]
impl FixedRenderer {
    /// Empty scene seen by an identity pose camera with f = 100 and a centered principal point.
    pub fn new(width: usize, height: usize) -> Self {
        FixedRenderer {
            width,
            height,
            focal: Vector2::new(100.0, 100.0),
            principal_point: Point2::new(width as f64 / 2.0, height as f64 / 2.0),
            near: 0.1,
            far: 100.0,
            depth: vec![BACKGROUND_DEPTH; width * height],
            image: RgbImage::new(width as u32, height as u32),
            depth_queries: std::cell::Cell::new(0),
        }
    }

    pub fn set_depth(&mut self, x: usize, y: usize, d: f32) {
        self.depth[y * self.width + x] = d;
    }

    /// Put a surface through `p` at the pixel it projects to.
    pub fn add_surface(&mut self, p: &Point3<f64>) -> (usize, usize) {
        let w = self.to_window_coords(p);
        let (x, y) = (w.x.round() as usize, w.y.round() as usize);
        self.set_depth(x, y, w.z as f32);
        (x, y)
    }
}

#[cfg(test)]
impl Renderer for FixedRenderer {
    fn window_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn focal_length(&self) -> Vector2<f64> {
        self.focal
    }

    fn principal_point(&self) -> Point2<f64> {
        self.principal_point
    }

    fn clip(&self) -> (f64, f64) {
        (self.near, self.far)
    }

    fn view_pose(&self) -> (Basis3<f64>, Vector3<f64>) {
        use cgmath::{One, Zero};
        (Basis3::one(), Vector3::zero())
    }

    fn depth(&self, x: usize, y: usize) -> f32 {
        self.depth_queries.set(self.depth_queries.get() + 1);
        self.depth[y * self.width + x]
    }

    fn to_window_coords(&self, p: &Point3<f64>) -> Point3<f64> {
        camera_to_window(
            *p,
            self.focal,
            self.principal_point,
            self.height,
            (self.near, self.far),
        )
    }

    fn screenshot(&self) -> RgbImage {
        self.image.clone()
    }
}
