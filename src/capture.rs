//! Capture sessions: turn the renderer's current view into an image on disk and a dataset view.

use cgmath::{Point2, Point3};
use image::{GrayImage, Luma, Rgb, Rgb32FImage, RgbImage};
use rayon::prelude::*;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::camera::{Camera, Distortion};
use crate::depth_cache::DepthCache;
use crate::renderer::{metric_depth, Renderer, BACKGROUND_DEPTH};
use crate::sfmdata::ViewSink;
use crate::visibility::visible_observations;
use crate::Error;

/// What kind of image a capture produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Color image warped by the lens distortion, with point observations.
    Photo,
    /// White foreground on black background.
    Silhouette,
    /// Metric depth along the optical axis, zero for background.
    Depth,
}

impl Mode {
    /// File extension of images written in this mode.
    pub fn extension(&self) -> &'static str {
        match self {
            Mode::Photo | Mode::Silhouette => "png",
            Mode::Depth => "exr",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "photo" => Ok(Mode::Photo),
            "silhouette" => Ok(Mode::Silhouette),
            "depth" => Ok(Mode::Depth),
            _ => Err(format!(
                "unknown capture mode {}, expected photo, silhouette or depth",
                s
            )),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Photo => "photo",
            Mode::Silhouette => "silhouette",
            Mode::Depth => "depth",
        };
        write!(f, "{}", name)
    }
}

/// State carried from one capture to the next: the image counter, the depth cache buffer and the
/// current lens distortion.
///
/// Captures are strictly sequential. Anything rendering several views at once needs one session
/// per worker.
pub struct Session<'a> {
    cloud: &'a [Point3<f64>],
    output: PathBuf,
    mode: Mode,
    counter: usize,
    cache: DepthCache,
    distortion: Distortion,
}

impl<'a> Session<'a> {
    /// Session writing images into `output`. The first image is numbered 1.
    pub fn new<P: Into<PathBuf>>(cloud: &'a [Point3<f64>], output: P, mode: Mode) -> Self {
        Session {
            cloud,
            output: output.into(),
            mode,
            counter: 0,
            cache: DepthCache::new(),
            distortion: Distortion::none(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of captures attempted so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn num_points(&self) -> usize {
        self.cloud.len()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn distortion(&self) -> Distortion {
        self.distortion
    }

    /// Change the lens used by later photos. Views already taken keep their own copy.
    pub fn set_distortion(&mut self, distortion: Distortion) {
        self.distortion = distortion;
    }

    /// Capture the renderer's current view in the session's mode. Returns the path of the
    /// written image.
    pub fn take_photo<R, S>(&mut self, renderer: &R, sink: &mut S) -> Result<PathBuf, Error>
    where
        R: Renderer + ?Sized,
        S: ViewSink + ?Sized,
    {
        self.take_photo_in(self.mode, renderer, sink)
    }

    /// Capture in `mode` instead of the session's mode. Numbering is shared across modes.
    pub fn take_photo_in<R, S>(
        &mut self,
        mode: Mode,
        renderer: &R,
        sink: &mut S,
    ) -> Result<PathBuf, Error>
    where
        R: Renderer + ?Sized,
        S: ViewSink + ?Sized,
    {
        self.counter += 1;
        let path = self
            .output
            .join(format!("{:06}.{}", self.counter, mode.extension()));
        match mode {
            Mode::Photo => self.photo(renderer, sink, path),
            Mode::Silhouette => silhouette(renderer, sink, path),
            Mode::Depth => depth(renderer, sink, path),
        }
    }

    fn photo<R, S>(&mut self, renderer: &R, sink: &mut S, path: PathBuf) -> Result<PathBuf, Error>
    where
        R: Renderer + ?Sized,
        S: ViewSink + ?Sized,
    {
        let (width, height) = renderer.window_size();
        if self.cache.reset(width, height) {
            log::debug!("Reallocated depth cache for {}x{} window", width, height);
        }

        let camera = Camera::from_renderer(renderer, self.distortion);
        let (observations, stats) =
            visible_observations(&camera, renderer, &mut self.cache, self.cloud);
        log::debug!("{}: {}", path.display(), stats);

        let image = remap_distorted(&renderer.screenshot(), &camera);
        save(&image, &path)?;

        log::info!(
            "Captured {} in photo mode with {} observations",
            path.display(),
            observations.len()
        );
        sink.add_view(camera, observations, path.clone());
        Ok(path)
    }
}

fn silhouette<R, S>(renderer: &R, sink: &mut S, path: PathBuf) -> Result<PathBuf, Error>
where
    R: Renderer + ?Sized,
    S: ViewSink + ?Sized,
{
    let camera = Camera::from_renderer(renderer, Distortion::none());
    save(&silhouette_image(renderer), &path)?;
    log::info!("Captured {} in silhouette mode", path.display());
    sink.add_view(camera, Vec::new(), path.clone());
    Ok(path)
}

fn depth<R, S>(renderer: &R, sink: &mut S, path: PathBuf) -> Result<PathBuf, Error>
where
    R: Renderer + ?Sized,
    S: ViewSink + ?Sized,
{
    let camera = Camera::from_renderer(renderer, Distortion::none());
    save(&metric_depth_image(renderer), &path)?;
    log::info!("Captured {} in depth mode", path.display());
    sink.add_view(camera, Vec::new(), path.clone());
    Ok(path)
}

fn save<I: SaveImage>(image: &I, path: &Path) -> Result<(), Error> {
    image.save_to(path).map_err(|source| Error::ImageError {
        path: path.to_path_buf(),
        source,
    })
}

trait SaveImage {
    fn save_to(&self, path: &Path) -> image::ImageResult<()>;
}

impl SaveImage for RgbImage {
    fn save_to(&self, path: &Path) -> image::ImageResult<()> {
        self.save(path)
    }
}

impl SaveImage for GrayImage {
    fn save_to(&self, path: &Path) -> image::ImageResult<()> {
        self.save(path)
    }
}

impl SaveImage for Rgb32FImage {
    fn save_to(&self, path: &Path) -> image::ImageResult<()> {
        self.save(path)
    }
}

/// Foreground mask of the current frame, top row first.
pub fn silhouette_image<R: Renderer + ?Sized>(renderer: &R) -> GrayImage {
    let (width, height) = renderer.window_size();
    GrayImage::from_fn(width as u32, height as u32, |x, row| {
        let y = height - 1 - row as usize;
        if renderer.depth(x as usize, y) == BACKGROUND_DEPTH {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Metric depth of the current frame, top row first. The depth is stored in all three channels.
pub fn metric_depth_image<R: Renderer + ?Sized>(renderer: &R) -> Rgb32FImage {
    let (width, height) = renderer.window_size();
    let (near, far) = renderer.clip();
    Rgb32FImage::from_fn(width as u32, height as u32, |x, row| {
        let y = height - 1 - row as usize;
        let d = renderer.depth(x as usize, y);
        let m = if d == BACKGROUND_DEPTH {
            0.0
        } else {
            metric_depth(d as f64, near, far) as f32
        };
        Rgb([m, m, m])
    })
}

fn bilinear(image: &RgbImage, p: Point2<f64>) -> [u8; 3] {
    let (w, h) = image.dimensions();
    let x = p.x.max(0.0).min((w - 1) as f64);
    let y = p.y.max(0.0).min((h - 1) as f64);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f64, y - y0 as f64);

    let mut out = [0; 3];
    for (c, v) in out.iter_mut().enumerate() {
        let at = |x, y| image.get_pixel(x, y)[c] as f64;
        let top = at(x0, y0) * (1.0 - tx) + at(x1, y0) * tx;
        let bottom = at(x0, y1) * (1.0 - tx) + at(x1, y1) * tx;
        *v = (top * (1.0 - ty) + bottom * ty).round().max(0.0).min(255.0) as u8;
    }
    out
}

/// Warp an image rendered through an ideal lens into what `camera`'s distorted lens would see.
/// Every output pixel samples the rendered image where its undistorted ray lands.
pub fn remap_distorted(image: &RgbImage, camera: &Camera) -> RgbImage {
    let (width, height) = image.dimensions();
    if camera.distortion.is_none() || width == 0 || height == 0 {
        return image.clone();
    }

    let mut out = RgbImage::new(width, height);
    let row_len = width as usize * 3;
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_mut(3).enumerate() {
                let source = camera.undistort_pixel(Point2::new(x as f64, y as f64));
                pixel.copy_from_slice(&bilinear(image, source));
            }
        });
    out
}

#[cfg(test)]
use crate::renderer::FixedRenderer;
#[cfg(test)]
use crate::sfmdata::SfmData;

#[cfg(test)]
fn four_point_scene() -> (FixedRenderer, Vec<Point3<f64>>) {
    let mut renderer = FixedRenderer::new(100, 100);
    let points = vec![
        Point3::new(0.0, 0.0, 5.0),
        Point3::new(0.0, 0.0, -5.0),
        Point3::new(0.2, 0.2, 10.0),
        Point3::new(5.0, 0.0, 5.0),
    ];
    renderer.add_surface(&points[0]);
    renderer.add_surface(&Point3::new(0.1, 0.1, 5.0));
    (renderer, points)
}

#[test]
fn test_photo_four_point_scene() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, points) = four_point_scene();
    let mut session = Session::new(&points, dir.path(), Mode::Photo);
    let mut data = SfmData::new();

    let path = session.take_photo(&renderer, &mut data).unwrap();
    assert_eq!(path, dir.path().join("000001.png"));
    assert!(path.exists());
    assert_eq!(data.num_views(), 1);
    let view = &data.views[0];
    assert_eq!(view.image_path, path);
    assert_eq!(view.observations.len(), 1);
    assert_eq!(view.observations[0].point, 0);
    assert_eq!(view.observations[0].location, Point2::new(50.0, 50.0));
}

#[test]
fn test_silhouette_empty_scene() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FixedRenderer::new(32, 24);
    let points = vec![Point3::new(0.0, 0.0, 1.0)];
    let mut session = Session::new(&points, dir.path(), Mode::Silhouette);
    session.set_distortion(Distortion::new(0.2, 0.0));
    let mut data = SfmData::new();

    let path = session.take_photo(&renderer, &mut data).unwrap();
    assert!(path.exists());
    assert!(silhouette_image(&renderer).pixels().all(|p| p[0] == 0));
    assert_eq!(data.views[0].observations.len(), 0);
    assert!(data.views[0].camera.distortion.is_none());
}

#[test]
fn test_silhouette_foreground_row_order() {
    let mut renderer = FixedRenderer::new(4, 3);
    // bottom left pixel in window coordinates is the bottom left of the image
    renderer.set_depth(0, 0, 0.5);
    let mask = silhouette_image(&renderer);
    assert_eq!(mask.get_pixel(0, 2), &Luma([255]));
    assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 1);
}

#[test]
fn test_depth_capture_metric_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut renderer = FixedRenderer::new(8, 8);
    renderer.set_depth(3, 7, 0.5);
    let img = metric_depth_image(&renderer);
    let m = img.get_pixel(3, 0)[0];
    assert!((m - 0.1998).abs() < 1e-4);
    assert_eq!(img.get_pixel(0, 0)[0], 0.0);

    let points = Vec::new();
    let mut session = Session::new(&points, dir.path(), Mode::Depth);
    let mut data = SfmData::new();
    let path = session.take_photo(&renderer, &mut data).unwrap();
    assert_eq!(path, dir.path().join("000001.exr"));
    assert!(path.exists());
    assert_eq!(data.num_observations(), 0);
}

#[test]
fn test_counter_increases_across_modes() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, points) = four_point_scene();
    let mut session = Session::new(&points, dir.path(), Mode::Photo);
    let mut data = SfmData::new();
    let names = vec![
        session.take_photo(&renderer, &mut data).unwrap(),
        session
            .take_photo_in(Mode::Depth, &renderer, &mut data)
            .unwrap(),
        session
            .take_photo_in(Mode::Silhouette, &renderer, &mut data)
            .unwrap(),
        session.take_photo(&renderer, &mut data).unwrap(),
    ];
    let names = names
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["000001.png", "000002.exr", "000003.png", "000004.png"]
    );
    assert_eq!(session.counter(), 4);
    assert_eq!(data.num_views(), 4);
}

#[test]
fn test_failed_write_adds_no_view() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, points) = four_point_scene();
    let mut session = Session::new(&points, dir.path().join("missing"), Mode::Photo);
    let mut data = SfmData::new();
    match session.take_photo(&renderer, &mut data) {
        Err(Error::ImageError { .. }) => (),
        r => panic!("expected image error, got {:?}", r),
    }
    assert_eq!(data.num_views(), 0);
    assert_eq!(session.counter(), 1);
}

#[test]
fn test_remap_identity_without_distortion() {
    let image = RgbImage::from_fn(16, 12, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7]));
    let camera = crate::camera::test_camera(Distortion::none());
    assert_eq!(remap_distorted(&image, &camera), image);
}

#[test]
fn test_remap_pincushion_pulls_from_center() {
    let image = RgbImage::from_fn(100, 100, |x, _| Rgb([x as u8, 0, 0]));
    let camera = crate::camera::test_camera(Distortion::new(0.1, 0.0));
    let out = remap_distorted(&image, &camera);
    // the principal point is a fixed point of the distortion
    assert_eq!(out.get_pixel(50, 50)[0], 50);
    // output x = 90 sees the ray that an ideal lens images near x = 89.4
    assert_eq!(out.get_pixel(90, 50)[0], 89);
    assert!(out.get_pixel(99, 50)[0] < 99);
}
