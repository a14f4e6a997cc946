//! Distorted pinhole camera model.
//!
//! Cameras follow the computer vision convention: x points right, y points down and the camera
//! looks down the positive z axis. A [Camera] is a snapshot of a [Renderer]'s view at the moment
//! of capture, so every point of one photo is projected under the same transform.

extern crate cgmath;

use cgmath::prelude::*;
use cgmath::{AbsDiffEq, Basis3, Matrix3, Point2, Point3, Quaternion, Vector2, Vector3};

use crate::renderer::Renderer;

#[cfg(test)]
use cgmath::{One, Zero};

/// Number of fixed point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

/// Convert Rodrigues vector to a rotation.
pub(crate) fn from_rodrigues(x: Vector3<f64>) -> Basis3<f64> {
    let theta2 = x.dot(x);
    if theta2 > cgmath::Rad::<f64>::default_epsilon() {
        let angle = cgmath::Rad(x.magnitude());
        let axis = x.normalize();
        cgmath::Basis3::from_axis_angle(axis, angle)
    } else {
        // first order approximation around the identity
        Basis3::from(Quaternion::from(Matrix3::new(
            1.0, x[2], -x[1], -x[2], 1.0, x[0], x[1], -x[0], 1.0,
        )))
    }
}

/// Convert rotation to Rodrigues vector.
pub(crate) fn to_rodrigues(x: Basis3<f64>) -> Vector3<f64> {
    let q = Quaternion::from(x);
    // q and -q are the same rotation, pick the one with the smaller angle
    let q = if q.s < 0.0 { -q } else { q };
    let sin_half = q.v.magnitude();
    if sin_half < 1e-12 {
        return q.v * 2.0;
    }
    let angle = 2.0 * sin_half.atan2(q.s);
    q.v / sin_half * angle
}

/// Two coefficient radial lens distortion. Normalized image coordinates `x` are mapped to
/// `x * (1 + k1 * r^2 + k2 * r^4)` where `r = |x|`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
}

impl Distortion {
    pub fn new(k1: f64, k2: f64) -> Self {
        Distortion { k1, k2 }
    }

    /// An ideal lens.
    pub fn none() -> Self {
        Distortion { k1: 0.0, k2: 0.0 }
    }

    pub fn is_none(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0
    }

    /// Radial scale factor for a squared radius `r2`.
    pub fn factor(&self, r2: f64) -> f64 {
        1.0 + self.k1 * r2 + self.k2 * r2 * r2
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        n * self.factor(n.magnitude2())
    }

    /// Find the undistorted normalized coordinates that [Distortion::distort] maps to `d`.
    pub fn undistort(&self, d: Vector2<f64>) -> Vector2<f64> {
        if self.is_none() {
            return d;
        }
        let mut n = d;
        for _ in 0..UNDISTORT_ITERATIONS {
            n = d / self.factor(n.magnitude2());
        }
        n
    }
}

/// Where a camera is placed and what it looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub eye: Point3<f64>,
    pub target: Point3<f64>,
    pub up: Vector3<f64>,
}

impl Viewpoint {
    pub fn new(eye: Point3<f64>, target: Point3<f64>, up: Vector3<f64>) -> Self {
        Viewpoint { eye, target, up }
    }

    /// World to camera transform `(R, t)` with `p_camera = R p + t`. If `up` is parallel to the
    /// viewing direction another axis is substituted.
    pub fn pose(&self) -> (Basis3<f64>, Vector3<f64>) {
        let forward = (self.target - self.eye).normalize();
        let mut right = forward.cross(self.up);
        if right.magnitude2() < 1e-12 {
            right = forward.cross(Vector3::unit_z());
            if right.magnitude2() < 1e-12 {
                right = forward.cross(Vector3::unit_x());
            }
        }
        let right = right.normalize();
        let down = forward.cross(right);
        let rotation = Basis3::from(Quaternion::from(
            Matrix3::from_cols(right, down, forward).transpose(),
        ));
        let translation = -rotation.rotate_point(self.eye).to_vec();
        (rotation, translation)
    }
}

/// Pinhole camera with radial distortion.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// World to camera rotation `R`.
    pub rotation: Basis3<f64>,
    /// World to camera translation `t`.
    pub translation: Vector3<f64>,
    /// Focal length in pixels along x and y.
    pub focal: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub distortion: Distortion,
    /// Image size as `(width, height)`.
    pub image_size: (usize, usize),
}

impl Camera {
    /// Snapshot the renderer's current intrinsics and pose. `distortion` is frozen for the
    /// lifetime of this camera.
    pub fn from_renderer<R: Renderer + ?Sized>(renderer: &R, distortion: Distortion) -> Self {
        let (rotation, translation) = renderer.view_pose();
        Camera {
            rotation,
            translation,
            focal: renderer.focal_length(),
            principal_point: renderer.principal_point(),
            distortion,
            image_size: renderer.window_size(),
        }
    }

    /// Transform a point from the world into the camera coordinate system.
    pub fn to_camera_coords(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation.rotate_point(*p) + self.translation
    }

    /// Transform a point from the camera coordinate system back into the world.
    pub fn to_world(&self, p: Point3<f64>) -> Point3<f64> {
        self.rotation.invert().rotate_point(p - self.translation)
    }

    /// Project a point in camera coordinates to distorted pixel coordinates.
    pub fn project_point_cam_coords(&self, p: Point3<f64>) -> Point2<f64> {
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        self.to_pixel(self.distortion.distort(n))
    }

    /// Project a world point to distorted pixel coordinates.
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        self.project_point_cam_coords(self.to_camera_coords(p))
    }

    /// Map a distorted pixel location to where an ideal lens would have imaged the same ray.
    pub fn undistort_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        let d = Vector2::new(
            (p.x - self.principal_point.x) / self.focal.x,
            (p.y - self.principal_point.y) / self.focal.y,
        );
        self.to_pixel(self.distortion.undistort(d))
    }

    fn to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.focal.x * n.x + self.principal_point.x,
            self.focal.y * n.y + self.principal_point.y,
        )
    }

    /// Is `p` inside `[0, width] x [0, height]`.
    pub fn in_image(&self, p: Point2<f64>) -> bool {
        let (width, height) = self.image_size;
        p.x >= 0.0 && p.x <= width as f64 && p.y >= 0.0 && p.y <= height as f64
    }

    /// Center of the camera.
    pub fn center(&self) -> Point3<f64> {
        Point3::from_vec(-(self.rotation.invert().rotate_vector(self.translation)))
    }

    /// Parameters in the order fx, fy, cx, cy, k1, k2, Rodrigues rotation, translation.
    pub fn to_vec(&self) -> Vec<f64> {
        let r = to_rodrigues(self.rotation);
        vec![
            self.focal.x,
            self.focal.y,
            self.principal_point.x,
            self.principal_point.y,
            self.distortion.k1,
            self.distortion.k2,
            r.x,
            r.y,
            r.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    /// Inverse of [Camera::to_vec]. `x` must have 12 entries.
    pub fn from_vec(x: &[f64], image_size: (usize, usize)) -> Self {
        Camera {
            focal: Vector2::new(x[0], x[1]),
            principal_point: Point2::new(x[2], x[3]),
            distortion: Distortion::new(x[4], x[5]),
            rotation: from_rodrigues(Vector3::new(x[6], x[7], x[8])),
            translation: Vector3::new(x[9], x[10], x[11]),
            image_size,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_camera(distortion: Distortion) -> Camera {
    Camera {
        rotation: Basis3::one(),
        translation: Vector3::zero(),
        focal: Vector2::new(100.0, 100.0),
        principal_point: Point2::new(50.0, 50.0),
        distortion,
        image_size: (100, 100),
    }
}

#[test]
fn test_project_center() {
    let c = test_camera(Distortion::new(0.3, 0.1));
    let uv = c.project(&Point3::new(0.0, 0.0, 2.0));
    assert!(uv.x == 50.0 && uv.y == 50.0);
}

#[test]
fn test_project_distorted() {
    let c = test_camera(Distortion::new(0.1, 0.01));
    // normalized (0.2, 0.1), r^2 = 0.05, factor = 1 + 0.005 + 0.000025
    let uv = c.project(&Point3::new(0.4, 0.2, 2.0));
    assert!((uv.x - (50.0 + 20.0 * 1.005025)).abs() < 1e-9);
    assert!((uv.y - (50.0 + 10.0 * 1.005025)).abs() < 1e-9);
}

#[test]
fn test_undistort_inverts_distort() {
    let ideal = test_camera(Distortion::none());
    let c = test_camera(Distortion::new(-0.2, 0.05));
    for p in &[
        Point3::new(0.3, -0.2, 1.0),
        Point3::new(-0.4, 0.4, 2.0),
        Point3::new(0.0, 0.1, 0.5),
    ] {
        let undistorted = c.undistort_pixel(c.project(p));
        let expected = ideal.project(p);
        assert!(undistorted.abs_diff_eq(&expected, 1e-6));
    }
}

#[test]
fn test_project_isomorphic() {
    let p = Point3::new(1.0, 3.0, -1.0);
    let c = Camera {
        rotation: from_rodrigues(Vector3::new(0.3, 0.5, -0.2)),
        translation: Vector3::new(0.5, -0.2, 0.1),
        ..test_camera(Distortion::none())
    };
    assert!(c.to_world(c.to_camera_coords(&p)).abs_diff_eq(&p, 1e-8));
}

#[test]
fn test_rodrigues_roundtrip() {
    for r in &[
        Vector3::new(0.3, 0.5, -0.2),
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.0, 3.0, 0.0),
    ] {
        let back = to_rodrigues(from_rodrigues(*r));
        assert!(back.abs_diff_eq(r, 1e-8), "{:?} != {:?}", back, r);
    }
}

#[test]
fn test_viewpoint_looks_at_target() {
    let vp = Viewpoint::new(
        Point3::new(3.0, 1.0, 4.0),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    );
    let (rotation, translation) = vp.pose();
    let c = Camera {
        rotation,
        translation,
        ..test_camera(Distortion::none())
    };
    let target = c.to_camera_coords(&vp.target);
    assert!(target.x.abs() < 1e-9 && target.y.abs() < 1e-9);
    assert!((target.z - (vp.eye - vp.target).magnitude()).abs() < 1e-9);
    assert!(c.center().abs_diff_eq(&vp.eye, 1e-9));
    // world up ends up towards the top of the image (negative y)
    assert!(rotation.rotate_vector(Vector3::unit_y()).y < 0.0);
}
