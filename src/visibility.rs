//! Decide which points of the cloud a camera actually sees.

use cgmath::{Point2, Point3};

use crate::camera::Camera;
use crate::depth_cache::DepthCache;
use crate::renderer::{Renderer, BACKGROUND_DEPTH};
use crate::sfmdata::Observation;

/// How far (in window depth) a point may lie behind the depth buffer and still count as visible.
pub const OCCLUSION_TOLERANCE: f64 = 1e-3;

/// Why a point did not produce an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The point is at or behind the camera plane.
    BehindCamera,
    /// The distorted projection falls outside the image.
    OutOfFrame,
    /// The window coordinates round to a pixel outside the depth buffer.
    OutsideDepthBuffer,
    /// Nearer geometry covers the point.
    Occluded,
}

/// Result of testing a single point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visibility {
    /// Seen at this distorted image location.
    Visible(Point2<f64>),
    Rejected(Rejection),
}

/// Number of points rejected for each reason during one capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityStats {
    pub visible: usize,
    pub behind_camera: usize,
    pub out_of_frame: usize,
    pub outside_depth_buffer: usize,
    pub occluded: usize,
}

impl VisibilityStats {
    fn record(&mut self, v: &Visibility) {
        match v {
            Visibility::Visible(_) => self.visible += 1,
            Visibility::Rejected(Rejection::BehindCamera) => self.behind_camera += 1,
            Visibility::Rejected(Rejection::OutOfFrame) => self.out_of_frame += 1,
            Visibility::Rejected(Rejection::OutsideDepthBuffer) => self.outside_depth_buffer += 1,
            Visibility::Rejected(Rejection::Occluded) => self.occluded += 1,
        }
    }
}

impl std::fmt::Display for VisibilityStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} visible, {} behind camera, {} out of frame, {} outside depth buffer, {} occluded",
            self.visible,
            self.behind_camera,
            self.out_of_frame,
            self.outside_depth_buffer,
            self.occluded
        )
    }
}

/// Is a point at window depth `point_depth` hidden by a depth buffer value `buffer_depth`.
/// Background never occludes, and a point exactly at the tolerance is still visible.
pub fn is_occluded(point_depth: f64, buffer_depth: f32) -> bool {
    buffer_depth != BACKGROUND_DEPTH && point_depth > buffer_depth as f64 + OCCLUSION_TOLERANCE
}

/// Depth buffer pixel nearest to window coordinates `(x, y)`. Rounding one step past the last
/// row or column is clamped onto it, anything further out has no pixel.
pub fn window_pixel(x: f64, y: f64, width: usize, height: usize) -> Option<(usize, usize)> {
    if width == 0 || height == 0 {
        return None;
    }
    let (x, y) = (x.round(), y.round());
    // written so that NaN is rejected too
    if !(x >= 0.0 && x <= width as f64 && y >= 0.0 && y <= height as f64) {
        return None;
    }
    Some(((x as usize).min(width - 1), (y as usize).min(height - 1)))
}

/// Test one world point against the camera and the renderer's depth buffer. Depth reads go
/// through `cache`, which must have been reset to the renderer's window size.
pub fn classify_point<R: Renderer + ?Sized>(
    camera: &Camera,
    renderer: &R,
    cache: &mut DepthCache,
    point: &Point3<f64>,
) -> Visibility {
    let p_camera = camera.to_camera_coords(point);
    if p_camera.z <= 0.0 {
        return Visibility::Rejected(Rejection::BehindCamera);
    }

    let p_image = camera.project_point_cam_coords(p_camera);
    if !camera.in_image(p_image) {
        return Visibility::Rejected(Rejection::OutOfFrame);
    }

    // The depth buffer lives in the renderer's undistorted window space, not in image space.
    let win = renderer.to_window_coords(point);
    let (width, height) = cache.size();
    let (x, y) = match window_pixel(win.x, win.y, width, height) {
        Some(px) => px,
        None => return Visibility::Rejected(Rejection::OutsideDepthBuffer),
    };

    let d = cache.get_or_sample(x, y, || renderer.depth(x, y));
    if is_occluded(win.z, d) {
        return Visibility::Rejected(Rejection::Occluded);
    }

    Visibility::Visible(p_image)
}

/// Observations of every visible point in `points`, in point order.
pub fn visible_observations<R: Renderer + ?Sized>(
    camera: &Camera,
    renderer: &R,
    cache: &mut DepthCache,
    points: &[Point3<f64>],
) -> (Vec<Observation>, VisibilityStats) {
    let mut stats = VisibilityStats::default();
    let mut observations = Vec::new();
    for (i, point) in points.iter().enumerate() {
        let v = classify_point(camera, renderer, cache, point);
        stats.record(&v);
        if let Visibility::Visible(location) = v {
            observations.push(Observation::new(i, location));
        }
    }
    (observations, stats)
}

#[cfg(test)]
use crate::camera::Distortion;
#[cfg(test)]
use crate::renderer::FixedRenderer;

#[cfg(test)]
fn setup(renderer: &FixedRenderer, distortion: Distortion) -> (Camera, DepthCache) {
    let mut cache = DepthCache::new();
    let (w, h) = renderer.window_size();
    cache.reset(w, h);
    (Camera::from_renderer(renderer, distortion), cache)
}

#[test]
fn test_four_point_scene() {
    let mut renderer = FixedRenderer::new(100, 100);
    let visible = Point3::new(0.0, 0.0, 5.0);
    let behind = Point3::new(0.0, 0.0, -5.0);
    let hidden = Point3::new(0.2, 0.2, 10.0);
    let outside = Point3::new(5.0, 0.0, 5.0);
    renderer.add_surface(&visible);
    // occluder on the same ray as `hidden`, but closer
    let occluder_px = renderer.add_surface(&Point3::new(0.1, 0.1, 5.0));
    let hidden_win = renderer.to_window_coords(&hidden);
    assert_eq!(
        window_pixel(hidden_win.x, hidden_win.y, 100, 100),
        Some(occluder_px)
    );

    let (camera, mut cache) = setup(&renderer, Distortion::none());
    let points = vec![visible, behind, hidden, outside];
    let (obs, stats) = visible_observations(&camera, &renderer, &mut cache, &points);

    assert_eq!(obs.len(), 1);
    assert_eq!(obs[0].point, 0);
    assert_eq!(obs[0].location, Point2::new(50.0, 50.0));
    assert_eq!(stats.behind_camera, 1);
    assert_eq!(stats.occluded, 1);
    assert_eq!(stats.out_of_frame, 1);
}

#[test]
fn test_behind_camera_never_observed() {
    let renderer = FixedRenderer::new(64, 48);
    let (camera, mut cache) = setup(&renderer, Distortion::new(0.1, 0.0));
    let points = (0..50)
        .map(|i| {
            let t = i as f64 / 10.0;
            Point3::new(t.sin() * 0.1, t.cos() * 0.1, -t)
        })
        .collect::<Vec<_>>();
    let (obs, stats) = visible_observations(&camera, &renderer, &mut cache, &points);
    assert!(obs.is_empty());
    assert_eq!(stats.behind_camera, points.len());
}

#[test]
fn test_observations_inside_image() {
    let renderer = FixedRenderer::new(80, 60);
    let (camera, mut cache) = setup(&renderer, Distortion::new(-0.15, 0.02));
    let mut points = Vec::new();
    for i in -10..=10 {
        for j in -10..=10 {
            points.push(Point3::new(i as f64 * 0.1, j as f64 * 0.1, 1.0));
        }
    }
    let (obs, stats) = visible_observations(&camera, &renderer, &mut cache, &points);
    assert!(!obs.is_empty());
    assert!(stats.out_of_frame > 0);
    for o in obs {
        assert!(o.location.x >= 0.0 && o.location.x <= 80.0);
        assert!(o.location.y >= 0.0 && o.location.y <= 60.0);
    }
}

#[test]
fn test_occlusion_threshold() {
    let buffer = 0.5f32;
    assert!(!is_occluded(buffer as f64, buffer));
    assert!(!is_occluded(buffer as f64 + OCCLUSION_TOLERANCE, buffer));
    assert!(is_occluded(buffer as f64 + 2.0 * OCCLUSION_TOLERANCE, buffer));
    assert!(!is_occluded(0.99, BACKGROUND_DEPTH));
}

#[test]
fn test_moving_point_in_front_of_occluder() {
    let mut renderer = FixedRenderer::new(100, 100);
    let far = Point3::new(0.2, 0.2, 10.0);
    let near = Point3::new(0.1, 0.1, 5.0);
    renderer.add_surface(&Point3::new(0.16, 0.16, 8.0));

    let (camera, mut cache) = setup(&renderer, Distortion::none());
    assert_eq!(
        classify_point(&camera, &renderer, &mut cache, &far),
        Visibility::Rejected(Rejection::Occluded)
    );
    assert!(match classify_point(&camera, &renderer, &mut cache, &near) {
        Visibility::Visible(_) => true,
        _ => false,
    });
}

#[test]
fn test_depth_read_once_per_pixel() {
    let renderer = FixedRenderer::new(100, 100);
    let (camera, mut cache) = setup(&renderer, Distortion::none());
    // both project to the image center
    let points = vec![Point3::new(0.0, 0.0, 2.0), Point3::new(0.0, 0.0, 7.0)];
    let (obs, _) = visible_observations(&camera, &renderer, &mut cache, &points);
    assert_eq!(obs.len(), 2);
    assert_eq!(renderer.depth_queries.get(), 1);
}

#[test]
fn test_window_pixel_bounds() {
    assert_eq!(window_pixel(0.4, 0.4, 10, 10), Some((0, 0)));
    assert_eq!(window_pixel(9.6, 9.6, 10, 10), Some((9, 9)));
    assert_eq!(window_pixel(10.4, 3.0, 10, 10), Some((9, 3)));
    assert_eq!(window_pixel(10.6, 3.0, 10, 10), None);
    assert_eq!(window_pixel(-0.6, 3.0, 10, 10), None);
    assert_eq!(window_pixel(std::f64::NAN, 3.0, 10, 10), None);
}
