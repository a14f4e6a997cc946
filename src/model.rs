//! Load the 3D models whose vertices become the dataset's point cloud.

extern crate ply_rs;
extern crate tobj;

use cgmath::prelude::*;
use cgmath::{Point3, Vector3};
use itertools::Itertools;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::Error;

/// Color of vertices that do not carry one.
pub const DEFAULT_COLOR: [u8; 3] = [200, 200, 200];

/// Triangulated model. `points` is the point cloud observations refer to by index.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub points: Vec<Point3<f64>>,
    /// One color per point.
    pub colors: Vec<[u8; 3]>,
    /// Indices into `points`. Empty for pure point clouds.
    pub triangles: Vec<[usize; 3]>,
}

impl Model {
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Smallest and largest coordinates of the model.
    pub fn extent(&self) -> (Point3<f64>, Point3<f64>) {
        let inf = std::f64::INFINITY;
        self.points.iter().fold(
            (Point3::new(inf, inf, inf), Point3::new(-inf, -inf, -inf)),
            |(lo, hi), p| {
                (
                    Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                    Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
                )
            },
        )
    }

    /// Center of the bounding box.
    pub fn center(&self) -> Point3<f64> {
        let (lo, hi) = self.extent();
        lo.midpoint(hi)
    }

    /// Radius of the bounding sphere around [Model::center].
    pub fn radius(&self) -> f64 {
        let c = self.center();
        self.points
            .iter()
            .map(|p| (*p - c).magnitude())
            .fold(0.0, f64::max)
    }

    /// Move the model so that the center of its bounding box is at the origin.
    pub fn centered(mut self) -> Self {
        if self.points.is_empty() {
            return self;
        }
        let offset: Vector3<f64> = self.center().to_vec();
        for p in self.points.iter_mut() {
            *p -= offset;
        }
        self
    }
}

/// Load a model from a `.obj` or `.ply` file.
pub fn import_model(path: &Path) -> Result<Model, Error> {
    let model = match path.extension().and_then(|e| e.to_str()) {
        Some("obj") => import_obj(path)?,
        Some("ply") => import_ply(path)?,
        ext => {
            return Err(Error::ModelError(format!(
                "unsupported model format {:?} for {}",
                ext,
                path.display()
            )))
        }
    };
    if model.points.is_empty() {
        return Err(Error::ModelError(format!(
            "{} contains no vertices",
            path.display()
        )));
    }
    log::info!(
        "Loaded {} with {} points and {} triangles",
        path.display(),
        model.points.len(),
        model.triangles.len()
    );
    Ok(model)
}

/// Load every object in an `.obj` file into a single model.
pub fn import_obj(path: &Path) -> Result<Model, Error> {
    let (models, _) = tobj::load_obj(path)
        .map_err(|e| Error::ModelError(format!("{}: {:?}", path.display(), e)))?;

    let mut model = Model::default();
    for m in models.iter() {
        let base = model.points.len();
        model.points.extend(
            m.mesh
                .positions
                .iter()
                .tuples()
                .map(|(x, y, z)| Point3::new(*x as f64, *y as f64, *z as f64)),
        );
        model.triangles.extend(
            m.mesh
                .indices
                .iter()
                .tuples()
                .map(|(i, j, k)| [base + *i as usize, base + *j as usize, base + *k as usize]),
        );
    }
    model.colors = vec![DEFAULT_COLOR; model.points.len()];
    Ok(model)
}

fn scalar(p: &Property) -> Option<f64> {
    match *p {
        Property::Char(x) => Some(x as f64),
        Property::UChar(x) => Some(x as f64),
        Property::Short(x) => Some(x as f64),
        Property::UShort(x) => Some(x as f64),
        Property::Int(x) => Some(x as f64),
        Property::UInt(x) => Some(x as f64),
        Property::Float(x) => Some(x as f64),
        Property::Double(x) => Some(x),
        _ => None,
    }
}

fn index_list(p: &Property) -> Option<Vec<usize>> {
    match p {
        Property::ListChar(v) => Some(v.iter().map(|x| *x as usize).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|x| *x as usize).collect()),
        Property::ListShort(v) => Some(v.iter().map(|x| *x as usize).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|x| *x as usize).collect()),
        Property::ListInt(v) => Some(v.iter().map(|x| *x as usize).collect()),
        Property::ListUInt(v) => Some(v.iter().map(|x| *x as usize).collect()),
        _ => None,
    }
}

fn vertex(e: &DefaultElement) -> Option<(Point3<f64>, [u8; 3])> {
    let coord = |name: &str| e.get(name).and_then(scalar);
    let p = Point3::new(coord("x")?, coord("y")?, coord("z")?);
    let channel = |name: &str| match e.get(name) {
        Some(Property::UChar(c)) => Some(*c),
        _ => None,
    };
    let color = match (channel("red"), channel("green"), channel("blue")) {
        (Some(r), Some(g), Some(b)) => [r, g, b],
        _ => DEFAULT_COLOR,
    };
    Some((p, color))
}

/// Load an ascii or binary `.ply` file. Polygonal faces are split into triangle fans.
pub fn import_ply(path: &Path) -> Result<Model, Error> {
    let mut file = BufReader::new(File::open(path)?);
    let parser = Parser::<DefaultElement>::new();
    let ply = parser.read_ply(&mut file)?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| Error::ModelError(format!("{} has no vertex element", path.display())))?;

    let mut model = Model::default();
    for (i, e) in vertices.iter().enumerate() {
        let (p, color) = vertex(e).ok_or_else(|| {
            Error::ModelError(format!(
                "vertex {} of {} is missing a coordinate",
                i,
                path.display()
            ))
        })?;
        model.points.push(p);
        model.colors.push(color);
    }

    if let Some(faces) = ply.payload.get("face") {
        for face in faces {
            let indices = face
                .get("vertex_indices")
                .or_else(|| face.get("vertex_index"))
                .and_then(index_list)
                .unwrap_or_default();
            if indices.iter().any(|i| *i >= model.points.len()) {
                return Err(Error::ModelError(format!(
                    "face of {} refers to a missing vertex",
                    path.display()
                )));
            }
            for k in 2..indices.len() {
                model
                    .triangles
                    .push([indices[0], indices[k - 1], indices[k]]);
            }
        }
    }

    Ok(model)
}

#[test]
fn test_center_and_radius() {
    let model = Model {
        points: vec![Point3::new(1.0, 2.0, 3.0), Point3::new(3.0, 4.0, 7.0)],
        colors: vec![DEFAULT_COLOR; 2],
        triangles: Vec::new(),
    };
    assert_eq!(model.center(), Point3::new(2.0, 3.0, 5.0));
    assert!((model.radius() - 6f64.sqrt()).abs() < 1e-12);
    let centered = model.centered();
    assert_eq!(centered.points[0], Point3::new(-1.0, -1.0, -2.0));
}

#[test]
fn test_import_ply_quad() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quad.ply");
    std::fs::write(
        &path,
        "ply\n\
         format ascii 1.0\n\
         element vertex 4\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         element face 1\n\
         property list uchar int vertex_indices\n\
         end_header\n\
         0 0 0 255 0 0\n\
         1 0 0 255 0 0\n\
         1 1 0 255 0 0\n\
         0 1 0 255 0 0\n\
         4 0 1 2 3\n",
    )
    .unwrap();
    let model = import_model(&path).unwrap();
    assert_eq!(model.num_points(), 4);
    assert_eq!(model.triangles, vec![[0, 1, 2], [0, 2, 3]]);
    assert_eq!(model.colors[2], [255, 0, 0]);
}

#[test]
fn test_import_unknown_format() {
    assert!(import_model(Path::new("model.stl")).is_err());
}
