//! Accumulated views of a synthetic structure-from-motion dataset.

extern crate byteorder;
extern crate itertools;
extern crate nom;
extern crate ply_rs;

use byteorder::*;
use cgmath::{Point2, Point3};
use itertools::Itertools;
use nom::bytes::complete::take;
use nom::character::complete::{digit1, multispace0, not_line_ending};
use nom::error::VerboseError;
use nom::multi::count;
use nom::number::complete::{be_f64, be_u64, double};
use nom::sequence::*;
use nom::IResult;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Ply, Property, PropertyDef, PropertyType, ScalarType,
};
use ply_rs::writer::Writer;

use std::fs::File;
use std::io::prelude::*;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::camera::Camera;
use crate::Error;

/// A 3D point seen at a location in one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Index of the point in the point cloud.
    pub point: usize,
    /// Distorted image coordinates.
    pub location: Point2<f64>,
}

impl Observation {
    pub fn new(point: usize, location: Point2<f64>) -> Self {
        Observation { point, location }
    }
}

/// One capture: the camera it was taken with, what it saw and where the image went.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub camera: Camera,
    pub observations: Vec<Observation>,
    pub image_path: PathBuf,
}

/// Receives each capture as it is taken.
pub trait ViewSink {
    fn add_view(&mut self, camera: Camera, observations: Vec<Observation>, image_path: PathBuf);
}

/// Append only list of views.
///
/// Points are not stored here, observations refer to them by index. Readers and writers take or
/// return the point cloud alongside the views.
#[derive(Debug, Clone, Default)]
pub struct SfmData {
    pub views: Vec<View>,
}

impl ViewSink for SfmData {
    fn add_view(&mut self, camera: Camera, observations: Vec<Observation>, image_path: PathBuf) {
        self.views.push(View {
            camera,
            observations,
            image_path,
        });
    }
}

impl SfmData {
    pub fn new() -> Self {
        SfmData::default()
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Number of point observations over all views.
    pub fn num_observations(&self) -> usize {
        self.views.iter().map(|v| v.observations.len()).sum()
    }

    /// Amount of reprojection error in the dataset. Computed as the `norm`-norm of the difference
    /// of all observations from the projection of their points.
    pub fn total_reprojection_error(&self, points: &[Point3<f64>], norm: f64) -> f64 {
        self.views
            .iter()
            .map(|view| {
                view.observations
                    .iter()
                    .map(|o| {
                        let p = view.camera.project(&points[o.point]);
                        (p.x - o.location.x).abs().powf(norm)
                            + (p.y - o.location.y).abs().powf(norm)
                    })
                    .sum::<f64>()
            })
            .sum::<f64>()
            .powf(1. / norm)
    }

    fn check_indices(self, points: Vec<Point3<f64>>) -> Result<(Self, Vec<Point3<f64>>), Error> {
        for (i, view) in self.views.iter().enumerate() {
            if let Some(o) = view.observations.iter().find(|o| o.point >= points.len()) {
                return Err(Error::ParseError(format!(
                    "view {} observes point {} but there are only {} points",
                    i,
                    o.point,
                    points.len()
                )));
            }
        }
        Ok((self, points))
    }

    /// Parse a dataset in the text format written by [SfmData::write_text].
    pub fn from_file_text(filepath: &Path) -> Result<(Self, Vec<Point3<f64>>), Error> {
        type Res<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

        fn unsigned(input: &str) -> Res<usize> {
            preceded(
                multispace0,
                nom::combinator::map_res(digit1, usize::from_str),
            )(input)
        }

        fn float(input: &str) -> Res<f64> {
            preceded(multispace0, double)(input)
        }

        fn observation(input: &str) -> Res<Observation> {
            let (input, (i, u, v)) = tuple((unsigned, float, float))(input)?;
            Ok((input, Observation::new(i, Point2::new(u, v))))
        }

        fn line(input: &str) -> Res<&str> {
            preceded(multispace0, not_line_ending)(input)
        }

        fn view(input: &str) -> Res<View> {
            let (input, image_path) = line(input)?;
            let (input, intrin) = count(float, 6)(input)?;
            let (input, width) = unsigned(input)?;
            let (input, height) = unsigned(input)?;
            let (input, pose) = count(float, 6)(input)?;
            let (input, num_obs) = unsigned(input)?;
            let (input, observations) = count(observation, num_obs)(input)?;
            let params = intrin.into_iter().chain(pose).collect::<Vec<_>>();
            Ok((
                input,
                View {
                    camera: Camera::from_vec(&params, (width, height)),
                    observations,
                    image_path: PathBuf::from(image_path.trim_end()),
                },
            ))
        }

        fn point(input: &str) -> Res<Point3<f64>> {
            let (input, (x, y, z)) = tuple((float, float, float))(input)?;
            Ok((input, Point3::new(x, y, z)))
        }

        fn parse_internal(input: &str) -> Res<(SfmData, Vec<Point3<f64>>)> {
            let (input, num_views) = unsigned(input)?;
            let (input, num_points) = unsigned(input)?;
            let (input, _num_observations) = unsigned(input)?;
            let (input, views) = count(view, num_views)(input)?;
            let (input, points) = count(point, num_points)(input)?;
            Ok((input, (SfmData { views }, points)))
        }

        let mut file = File::open(filepath)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let (sfm, points) = parse_internal(contents.as_ref())
            .map(|x| x.1)
            .map_err(|x| match x {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    Error::ParseError(nom::error::convert_error(contents.as_ref(), e))
                }
                nom::Err::Incomplete(x) => Error::ParseError(format!("{:?}", x)),
            })?;
        sfm.check_indices(points)
    }

    /// Parse a dataset in the binary format written by [SfmData::write_binary].
    pub fn from_file_binary(filepath: &Path) -> Result<(Self, Vec<Point3<f64>>), Error> {
        type Res<'a, O> = IResult<&'a [u8], O>;

        fn unsigned(input: &[u8]) -> Res<usize> {
            nom::combinator::map(be_u64, |x| x as usize)(input)
        }

        fn float(input: &[u8]) -> Res<f64> {
            be_f64(input)
        }

        fn path(input: &[u8]) -> Res<&str> {
            let (input, len) = unsigned(input)?;
            nom::combinator::map_res(take(len), std::str::from_utf8)(input)
        }

        fn observation(input: &[u8]) -> Res<Observation> {
            let (input, (i, u, v)) = tuple((unsigned, float, float))(input)?;
            Ok((input, Observation::new(i, Point2::new(u, v))))
        }

        fn view(input: &[u8]) -> Res<View> {
            let (input, image_path) = path(input)?;
            let (input, width) = unsigned(input)?;
            let (input, height) = unsigned(input)?;
            let (input, params) = count(float, 12)(input)?;
            let (input, num_obs) = unsigned(input)?;
            let (input, observations) = count(observation, num_obs)(input)?;
            Ok((
                input,
                View {
                    camera: Camera::from_vec(&params, (width, height)),
                    observations,
                    image_path: PathBuf::from(image_path),
                },
            ))
        }

        fn point(input: &[u8]) -> Res<Point3<f64>> {
            let (input, (x, y, z)) = tuple((float, float, float))(input)?;
            Ok((input, Point3::new(x, y, z)))
        }

        fn parse_internal(input: &[u8]) -> Res<(SfmData, Vec<Point3<f64>>)> {
            let (input, num_views) = unsigned(input)?;
            let (input, num_points) = unsigned(input)?;
            let (input, _num_observations) = unsigned(input)?;
            let (input, views) = count(view, num_views)(input)?;
            let (input, points) = count(point, num_points)(input)?;
            Ok((input, (SfmData { views }, points)))
        }

        let mut file = File::open(filepath)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (sfm, points) = parse_internal(contents.as_slice())
            .map(|x| x.1)
            .map_err(|x| match x {
                nom::Err::Error(_) | nom::Err::Failure(_) => {
                    Error::ParseError("Binary parse error".to_string())
                }
                nom::Err::Incomplete(x) => Error::ParseError(format!("{:?}", x)),
            })?;
        sfm.check_indices(points)
    }

    /// Parse a dataset. Text or binary format is chosen from the filename extension. `.sfm` ->
    /// text, `.bsfm` -> binary.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<Point3<f64>>), Error> {
        match extension(path)? {
            "sfm" => Self::from_file_text(path),
            "bsfm" => Self::from_file_binary(path),
            ext => Err(Error::IOError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown file extension {}", ext),
            ))),
        }
    }

    /// Write views and points in text format.
    ///
    /// ```txt
    /// <num_views> <num_points> <num_observations>
    /// <view_1>
    /// ...
    /// <view_num_views>
    /// <point_1>
    /// ...
    /// <point_num_points>
    /// ```
    /// where views are:
    /// ```txt
    /// <image path>
    /// <fx> <fy> <cx> <cy> <k1> <k2> <width> <height>
    /// <R_1> <R_2> <R_3> <t_1> <t_2> <t_3>
    /// <num_observations_in_view>
    /// <point_index_1> <u_1> <v_1>
    /// ...
    /// ```
    /// and `R` is a Rodrigues vector.
    pub fn write_text(&self, path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(
            &mut file,
            "{} {} {}",
            self.num_views(),
            points.len(),
            self.num_observations()
        )?;
        for view in &self.views {
            let params = view.camera.to_vec();
            let (width, height) = view.camera.image_size;
            writeln!(&mut file, "{}", view.image_path.display())?;
            writeln!(
                &mut file,
                "{} {} {}",
                params[..6].iter().join(" "),
                width,
                height
            )?;
            writeln!(&mut file, "{}", params[6..].iter().join(" "))?;
            writeln!(&mut file, "{}", view.observations.len())?;
            for o in &view.observations {
                writeln!(&mut file, "{} {} {}", o.point, o.location.x, o.location.y)?;
            }
        }

        for point in points {
            writeln!(&mut file, "{} {} {}", point[0], point[1], point[2])?;
        }

        Ok(())
    }

    /// Write views and points in big endian binary format. Same layout as the text format, image
    /// paths are stored as a length followed by UTF-8 bytes.
    pub fn write_binary(&self, path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_u64::<BigEndian>(self.num_views() as u64)?;
        file.write_u64::<BigEndian>(points.len() as u64)?;
        file.write_u64::<BigEndian>(self.num_observations() as u64)?;

        for view in &self.views {
            let image_path = view.image_path.to_string_lossy();
            file.write_u64::<BigEndian>(image_path.len() as u64)?;
            file.write_all(image_path.as_bytes())?;
            file.write_u64::<BigEndian>(view.camera.image_size.0 as u64)?;
            file.write_u64::<BigEndian>(view.camera.image_size.1 as u64)?;
            for x in view.camera.to_vec().into_iter() {
                file.write_f64::<BigEndian>(x)?;
            }
            file.write_u64::<BigEndian>(view.observations.len() as u64)?;
            for o in &view.observations {
                file.write_u64::<BigEndian>(o.point as u64)?;
                file.write_f64::<BigEndian>(o.location.x)?;
                file.write_f64::<BigEndian>(o.location.y)?;
            }
        }

        for point in points {
            file.write_f64::<BigEndian>(point[0])?;
            file.write_f64::<BigEndian>(point[1])?;
            file.write_f64::<BigEndian>(point[2])?;
        }

        Ok(())
    }

    /// Write the dataset to a file. Text or binary format is automatically chosen from the
    /// filename extension. `.sfm` -> text, `.bsfm` -> binary. Datasets without views are not
    /// written.
    pub fn write(&self, path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
        if self.views.is_empty() {
            return Err(Error::EmptyDataset(format!(
                "refusing to write {} without any views",
                path.display()
            )));
        }
        match extension(path)? {
            "sfm" => self.write_text(path, points),
            "bsfm" => self.write_binary(path, points),
            ext => Err(Error::IOError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown file extension {}", ext),
            ))),
        }
    }

    /// Write camera centers and points to a ply file for visualization. Cameras are red, points
    /// are green, and every observation is an edge from its camera to its point.
    pub fn write_ply(&self, path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
        let mut ply = Ply::<DefaultElement>::new();
        let mut point_element = ElementDef::new("vertex".to_string());
        for name in &["x", "y", "z"] {
            point_element.properties.add(PropertyDef::new(
                name.to_string(),
                PropertyType::Scalar(ScalarType::Float),
            ));
        }
        for name in &["red", "green", "blue"] {
            point_element.properties.add(PropertyDef::new(
                name.to_string(),
                PropertyType::Scalar(ScalarType::UChar),
            ));
        }
        ply.header.elements.add(point_element);
        let mut edge_element = ElementDef::new("edge".to_string());
        edge_element.properties.add(PropertyDef::new(
            "vertex1".to_string(),
            PropertyType::Scalar(ScalarType::Int),
        ));
        edge_element.properties.add(PropertyDef::new(
            "vertex2".to_string(),
            PropertyType::Scalar(ScalarType::Int),
        ));
        ply.header.elements.add(edge_element);

        let vertex = |p: Point3<f64>, color: (u8, u8, u8)| {
            let mut e = DefaultElement::new();
            e.insert("x".to_string(), Property::Float(p.x as f32));
            e.insert("y".to_string(), Property::Float(p.y as f32));
            e.insert("z".to_string(), Property::Float(p.z as f32));
            e.insert("red".to_string(), Property::UChar(color.0));
            e.insert("green".to_string(), Property::UChar(color.1));
            e.insert("blue".to_string(), Property::UChar(color.2));
            e
        };
        let mut vertices: Vec<_> = self
            .views
            .iter()
            .map(|view| vertex(view.camera.center(), (255, 0, 0)))
            .collect();
        vertices.extend(points.iter().map(|p| vertex(*p, (0, 255, 0))));
        ply.payload.insert("vertex".to_string(), vertices);

        let num_views = self.num_views();
        let edges = self
            .views
            .iter()
            .enumerate()
            .flat_map(|(vi, view)| {
                view.observations.iter().map(move |o| {
                    let mut e = DefaultElement::new();
                    e.insert("vertex1".to_string(), Property::Int(vi as i32));
                    e.insert(
                        "vertex2".to_string(),
                        Property::Int((o.point + num_views) as i32),
                    );
                    e
                })
            })
            .collect();
        ply.payload.insert("edge".to_string(), edges);

        let mut file = BufWriter::new(File::create(path)?);
        let writer = Writer::new();
        writer.write_ply(&mut file, &mut ply)?;
        Ok(())
    }
}

fn extension(path: &Path) -> Result<&str, Error> {
    path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
        Error::IOError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file extension", path.display()),
        ))
    })
}

impl std::fmt::Display for SfmData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SfM dataset with {} views and {} observations",
            self.num_views(),
            self.num_observations()
        )
    }
}

#[cfg(test)]
fn test_dataset() -> (SfmData, Vec<Point3<f64>>) {
    use crate::camera::{test_camera, Distortion, Viewpoint};
    use cgmath::Vector3;

    let points = vec![
        Point3::new(0.0, 0.0, 5.0),
        Point3::new(0.5, -0.25, 4.0),
        Point3::new(-0.3, 0.1, 6.5),
    ];
    let mut sfm = SfmData::new();
    let eyes = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.5, -0.5)];
    for (i, eye) in eyes.iter().enumerate() {
        let (rotation, translation) =
            Viewpoint::new(*eye, Point3::new(0.0, 0.0, 5.0), Vector3::unit_y()).pose();
        let camera = Camera {
            rotation,
            translation,
            ..test_camera(Distortion::new(0.05 * i as f64, -0.01))
        };
        let obs = points
            .iter()
            .enumerate()
            .map(|(j, p)| Observation::new(j, camera.project(p)))
            .collect();
        sfm.add_view(camera, obs, PathBuf::from(format!("out dir/{:06}.png", i + 1)));
    }
    (sfm, points)
}

#[test]
fn test_reprojection_error_exact() {
    let (sfm, points) = test_dataset();
    assert_eq!(sfm.num_observations(), 6);
    assert!(sfm.total_reprojection_error(&points, 1.) < 1e-9);
    assert!(sfm.total_reprojection_error(&points, 2.) < 1e-9);
}

#[test]
fn test_text_and_binary_formats_agree() {
    let dir = tempfile::tempdir().unwrap();
    let (sfm, points) = test_dataset();
    let text = dir.path().join("data.sfm");
    let binary = dir.path().join("data.bsfm");
    sfm.write(&text, &points).unwrap();
    sfm.write(&binary, &points).unwrap();

    for path in &[text, binary] {
        let (read, read_points) = SfmData::from_file(path).unwrap();
        assert_eq!(read_points, points);
        assert_eq!(read.num_views(), 2);
        for (a, b) in read.views.iter().zip(sfm.views.iter()) {
            assert_eq!(a.image_path, b.image_path);
            assert_eq!(a.observations, b.observations);
            assert_eq!(a.camera.image_size, b.camera.image_size);
            assert_eq!(a.camera.distortion, b.camera.distortion);
        }
        assert!(read.total_reprojection_error(&read_points, 2.) < 1e-6);
    }
}

#[test]
fn test_rejects_dangling_point_index() {
    let dir = tempfile::tempdir().unwrap();
    let (sfm, points) = test_dataset();
    let path = dir.path().join("data.sfm");
    sfm.write(&path, &points[..1]).unwrap();
    assert!(SfmData::from_file(&path).is_err());
}

#[test]
fn test_unknown_extension() {
    let (sfm, points) = test_dataset();
    assert!(sfm.write(Path::new("data.txt"), &points).is_err());
}

#[test]
fn test_empty_dataset_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.sfm");
    match SfmData::new().write(&path, &[]) {
        Err(Error::EmptyDataset(_)) => (),
        r => panic!("expected empty dataset error, got {:?}", r),
    }
    assert!(!path.exists());
}
