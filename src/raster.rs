//! Software z-buffer renderer for models, so captures can run without a window.

use cgmath::prelude::*;
use cgmath::{Basis3, One, Point2, Point3, Vector2, Vector3, Zero};
use image::{Rgb, RgbImage};

use crate::camera::Viewpoint;
use crate::model::Model;
use crate::renderer::{camera_to_window, Renderer, BACKGROUND_DEPTH};

/// Rasterizes a [Model] from the current viewpoint into a color and a depth buffer. Both buffers
/// are stored in window order, bottom row first.
pub struct Rasterizer<'a> {
    model: &'a Model,
    width: usize,
    height: usize,
    focal: Vector2<f64>,
    principal_point: Point2<f64>,
    near: f64,
    far: f64,
    rotation: Basis3<f64>,
    translation: Vector3<f64>,
    point_size: usize,
    depth: Vec<f32>,
    color: Vec<[u8; 3]>,
}

fn edge(a: Point3<f64>, b: Point3<f64>, x: f64, y: f64) -> f64 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

fn shade(color: [f64; 3], intensity: f64) -> [u8; 3] {
    let c = |x: f64| (x * intensity).round().max(0.0).min(255.0) as u8;
    [c(color[0]), c(color[1]), c(color[2])]
}

impl<'a> Rasterizer<'a> {
    /// Renderer with an identity pose, clip planes at 0.1 and 100, and the principal point in
    /// the middle of the window.
    pub fn new(model: &'a Model, width: usize, height: usize, focal: Vector2<f64>) -> Self {
        let mut r = Rasterizer {
            model,
            width,
            height,
            focal,
            principal_point: Point2::new(width as f64 / 2.0, height as f64 / 2.0),
            near: 0.1,
            far: 100.0,
            rotation: Basis3::one(),
            translation: Vector3::zero(),
            point_size: 0,
            depth: Vec::new(),
            color: Vec::new(),
        };
        r.render();
        r
    }

    pub fn with_clip(mut self, near: f64, far: f64) -> Self {
        self.near = near;
        self.far = far;
        self.render();
        self
    }

    /// Half width in pixels of the squares drawn for models without triangles.
    pub fn with_point_size(mut self, point_size: usize) -> Self {
        self.point_size = point_size;
        self.render();
        self
    }

    /// Move the camera and redraw.
    pub fn look_at(&mut self, viewpoint: &Viewpoint) {
        let (rotation, translation) = viewpoint.pose();
        self.set_pose(rotation, translation);
    }

    /// Set the world to camera transform and redraw.
    pub fn set_pose(&mut self, rotation: Basis3<f64>, translation: Vector3<f64>) {
        self.rotation = rotation;
        self.translation = translation;
        self.render();
    }

    fn window(&self, p_camera: Point3<f64>) -> Point3<f64> {
        camera_to_window(
            p_camera,
            self.focal,
            self.principal_point,
            self.height,
            (self.near, self.far),
        )
    }

    fn plot(&mut self, x: usize, y: usize, depth: f32, color: [u8; 3]) {
        let i = y * self.width + x;
        if depth < self.depth[i] {
            self.depth[i] = depth;
            self.color[i] = color;
        }
    }

    /// Redraw both buffers from the current pose.
    pub fn render(&mut self) {
        let n = self.width * self.height;
        self.depth.clear();
        self.depth.resize(n, BACKGROUND_DEPTH);
        self.color.clear();
        self.color.resize(n, [0, 0, 0]);

        let model = self.model;
        let p_camera = model
            .points
            .iter()
            .map(|p| self.rotation.rotate_point(*p) + self.translation)
            .collect::<Vec<_>>();
        let p_window = p_camera
            .iter()
            .map(|p| self.window(*p))
            .collect::<Vec<_>>();

        if model.triangles.is_empty() {
            self.render_points(&p_camera, &p_window);
            return;
        }

        let mut clipped = 0;
        for tri in model.triangles.iter() {
            let [a, b, c] = *tri;
            if [a, b, c].iter().any(|i| p_camera[*i].z <= self.near) {
                clipped += 1;
                continue;
            }

            // flat shading with a light at the camera
            let normal = (p_camera[b] - p_camera[a]).cross(p_camera[c] - p_camera[a]);
            let centroid = Point3::centroid(&[p_camera[a], p_camera[b], p_camera[c]]);
            let intensity = if normal.magnitude2() > 0.0 {
                0.2 + 0.8 * normal.normalize().dot(centroid.to_vec().normalize()).abs()
            } else {
                0.2
            };
            let mut color = [0.0; 3];
            for i in &[a, b, c] {
                for (k, channel) in model.colors[*i].iter().enumerate() {
                    color[k] += *channel as f64 / 3.0;
                }
            }

            self.fill_triangle(
                [p_window[a], p_window[b], p_window[c]],
                shade(color, intensity),
            );
        }
        if clipped > 0 {
            log::warn!("Skipped {} triangles crossing the near plane", clipped);
        }
    }

    fn fill_triangle(&mut self, [w0, w1, w2]: [Point3<f64>; 3], color: [u8; 3]) {
        let area = edge(w0, w1, w2.x, w2.y);
        if area.abs() < 1e-12 {
            return;
        }
        let x_min = w0.x.min(w1.x).min(w2.x).floor().max(0.0);
        let x_max = w0.x.max(w1.x).max(w2.x).ceil().min(self.width as f64 - 1.0);
        let y_min = w0.y.min(w1.y).min(w2.y).floor().max(0.0);
        let y_max = w0.y.max(w1.y).max(w2.y).ceil().min(self.height as f64 - 1.0);
        if x_min > x_max || y_min > y_max {
            return;
        }

        for y in y_min as usize..=y_max as usize {
            for x in x_min as usize..=x_max as usize {
                let (px, py) = (x as f64, y as f64);
                let b0 = edge(w1, w2, px, py) / area;
                let b1 = edge(w2, w0, px, py) / area;
                let b2 = edge(w0, w1, px, py) / area;
                if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                    continue;
                }
                // window depth is affine in screen space
                let depth = b0 * w0.z + b1 * w1.z + b2 * w2.z;
                self.plot(x, y, depth as f32, color);
            }
        }
    }

    fn render_points(&mut self, p_camera: &[Point3<f64>], p_window: &[Point3<f64>]) {
        let r = self.point_size as i64;
        for (i, (pc, pw)) in p_camera.iter().zip(p_window).enumerate() {
            if pc.z <= self.near || pc.z >= self.far {
                continue;
            }
            let (cx, cy) = (pw.x.round() as i64, pw.y.round() as i64);
            for y in (cy - r)..=(cy + r) {
                for x in (cx - r)..=(cx + r) {
                    if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                        continue;
                    }
                    let color = self.model.colors[i];
                    self.plot(x as usize, y as usize, pw.z as f32, color);
                }
            }
        }
    }
}

impl<'a> Renderer for Rasterizer<'a> {
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
        (self.rotation, self.translation)
    }

    fn depth(&self, x: usize, y: usize) -> f32 {
        self.depth
            .get(y * self.width + x)
            .copied()
            .unwrap_or(BACKGROUND_DEPTH)
    }

    fn to_window_coords(&self, p: &Point3<f64>) -> Point3<f64> {
        self.window(self.rotation.rotate_point(*p) + self.translation)
    }

    fn screenshot(&self) -> RgbImage {
        let (w, h) = (self.width, self.height);
        RgbImage::from_fn(w as u32, h as u32, |x, row| {
            let y = h - 1 - row as usize;
            Rgb(self.color[y * w + x as usize])
        })
    }
}

#[cfg(test)]
fn unit_square(z: f64) -> Model {
    use crate::model::DEFAULT_COLOR;
    Model {
        points: vec![
            Point3::new(-1.0, -1.0, z),
            Point3::new(1.0, -1.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(-1.0, 1.0, z),
        ],
        colors: vec![DEFAULT_COLOR; 4],
        triangles: vec![[0, 1, 2], [0, 2, 3]],
    }
}

#[test]
fn test_square_depth_and_silhouette() {
    let model = unit_square(4.0);
    let r = Rasterizer::new(&model, 64, 64, Vector2::new(32.0, 32.0));
    // the square covers window x, y in roughly [24, 40]
    let center = r.depth(32, 32);
    let expected = crate::renderer::window_depth(4.0, 0.1, 100.0) as f32;
    assert!((center - expected).abs() < 1e-6);
    assert_eq!(r.depth(2, 2), BACKGROUND_DEPTH);
    let img = r.screenshot();
    assert_ne!(img.get_pixel(32, 32), &Rgb([0, 0, 0]));
    assert_eq!(img.get_pixel(2, 2), &Rgb([0, 0, 0]));
}

#[test]
fn test_nearer_surface_wins() {
    let mut model = unit_square(6.0);
    let near = unit_square(3.0);
    let base = model.points.len();
    model.points.extend(near.points.iter().map(|p| *p * 0.5));
    model.colors.extend(near.colors);
    model
        .triangles
        .extend(near.triangles.iter().map(|t| [t[0] + base, t[1] + base, t[2] + base]));
    let r = Rasterizer::new(&model, 64, 64, Vector2::new(32.0, 32.0));
    // scaled square sits at z = 1.5
    let expected = crate::renderer::window_depth(1.5, 0.1, 100.0) as f32;
    assert!((r.depth(32, 32) - expected).abs() < 1e-6);
}

#[test]
fn test_look_at_moves_view() {
    let model = unit_square(0.0);
    let mut r = Rasterizer::new(&model, 64, 64, Vector2::new(32.0, 32.0));
    // the identity camera sits inside the plane of the square
    assert_eq!(r.depth(32, 32), BACKGROUND_DEPTH);
    r.look_at(&Viewpoint::new(
        Point3::new(0.0, 0.0, -5.0),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    ));
    assert!(r.depth(32, 32) < BACKGROUND_DEPTH);
    let w = r.to_window_coords(&Point3::new(0.0, 0.0, 0.0));
    assert!((w.x - 32.0).abs() < 1e-9 && (w.y - 31.0).abs() < 1e-9);
}

#[test]
fn test_point_splats() {
    let mut model = unit_square(4.0);
    model.triangles.clear();
    let r = Rasterizer::new(&model, 64, 64, Vector2::new(32.0, 32.0)).with_point_size(1);
    let w = r.to_window_coords(&model.points[0]);
    let (x, y) = (w.x.round() as usize, w.y.round() as usize);
    assert!(r.depth(x, y) < BACKGROUND_DEPTH);
    assert!(r.depth(x + 1, y + 1) < BACKGROUND_DEPTH);
    assert_eq!(r.depth(32, 32), BACKGROUND_DEPTH);
}
