//! Drive a capture session over many viewpoints.
//!
//! Example usage:
//! ```
//! use cgmath::Vector2;
//! use sfmgen::generate::*;
//! use sfmgen::*;
//! use std::path::Path;
//!
//! // load the model from disk and put it at the origin
//! let model = import_model(Path::new("tests/box.obj")).expect("Could not load .obj").centered();
//! let mut renderer = Rasterizer::new(&model, 64, 48, Vector2::new(50.0, 50.0));
//! // orbit the model at 5 times its size
//! let commands = orbit_commands(model.center(), 5.0 * model.radius(), 3, 0);
//! // take a silhouette from every viewpoint
//! let dir = tempfile::tempdir().unwrap();
//! let mut session = Session::new(&model.points, dir.path(), Mode::Silhouette);
//! let mut data = SfmData::new();
//! run_commands(&mut renderer, &mut session, &mut data, &commands, false).unwrap();
//! assert_eq!(data.num_views(), 3);
//! ```

extern crate indicatif;
extern crate rand;

use cgmath::prelude::*;
use cgmath::{Point3, Vector3};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::Viewpoint;
use crate::capture::Session;
use crate::raster::Rasterizer;
use crate::script::Command;
use crate::sfmdata::ViewSink;
use crate::Error;

pub(crate) fn progress_bar(length: u64, message: &str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {percent}% ({eta})")
            .progress_chars("#-"),
    );
    pb.set_message(message);
    pb
}

/// `n` viewpoints uniformly distributed on a sphere of `radius` around `center`, all looking at
/// `center`. The same `seed` always gives the same viewpoints.
pub fn orbit_viewpoints(center: Point3<f64>, radius: f64, n: usize, seed: u64) -> Vec<Viewpoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            // uniform on the sphere: uniform height and uniform azimuth
            let y: f64 = rng.gen_range(-1.0, 1.0);
            let phi: f64 = rng.gen_range(0.0, 2.0 * std::f64::consts::PI);
            let r = (1.0 - y * y).sqrt();
            let dir = Vector3::new(r * phi.cos(), y, r * phi.sin());
            let up = if dir.dot(Vector3::unit_y()).abs() > 0.99 {
                Vector3::unit_z()
            } else {
                Vector3::unit_y()
            };
            Viewpoint::new(center + dir * radius, center, up)
        })
        .collect()
}

/// Script that moves to each of [orbit_viewpoints] and captures.
pub fn orbit_commands(center: Point3<f64>, radius: f64, n: usize, seed: u64) -> Vec<Command> {
    orbit_viewpoints(center, radius, n, seed)
        .into_iter()
        .flat_map(|v| vec![Command::LookAt(v), Command::Capture])
        .collect()
}

/// Run a viewpoint script against a renderer. Stops at the first capture that fails.
pub fn run_commands<S: ViewSink + ?Sized>(
    renderer: &mut Rasterizer,
    session: &mut Session,
    sink: &mut S,
    commands: &[Command],
    verbose: bool,
) -> Result<(), Error> {
    let captures = commands.iter().filter(|c| **c == Command::Capture).count();
    let pb = progress_bar(captures as u64, "Capturing views", verbose);
    for command in commands {
        match command {
            Command::LookAt(viewpoint) => renderer.look_at(viewpoint),
            Command::Distortion(distortion) => session.set_distortion(*distortion),
            Command::Capture => {
                session.take_photo(&*renderer, &mut *sink)?;
                pb.inc(1);
            }
        }
    }
    pb.finish();
    Ok(())
}

#[test]
fn test_orbit_on_sphere() {
    let center = Point3::new(1.0, 2.0, 3.0);
    let views = orbit_viewpoints(center, 4.0, 50, 7);
    assert_eq!(views.len(), 50);
    for v in views.iter() {
        assert!(((v.eye - center).magnitude() - 4.0).abs() < 1e-9);
        assert_eq!(v.target, center);
        assert!((v.eye - center).normalize().dot(v.up).abs() <= 0.99);
    }
}

#[test]
fn test_orbit_is_seeded() {
    let center = Point3::new(0.0, 0.0, 0.0);
    assert_eq!(
        orbit_viewpoints(center, 1.0, 5, 3),
        orbit_viewpoints(center, 1.0, 5, 3)
    );
    assert_ne!(
        orbit_viewpoints(center, 1.0, 5, 3),
        orbit_viewpoints(center, 1.0, 5, 4)
    );
}

#[test]
fn test_orbit_commands_alternate() {
    let commands = orbit_commands(Point3::new(0.0, 0.0, 0.0), 2.0, 3, 0);
    assert_eq!(commands.len(), 6);
    assert!(commands.iter().skip(1).step_by(2).all(|c| *c == Command::Capture));
}
