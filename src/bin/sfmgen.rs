extern crate cgmath;
extern crate env_logger;
extern crate sfmgen;
extern crate structopt;

use cgmath::Vector2;
use sfmgen::generate::*;
use sfmgen::script::load_script;
use sfmgen::*;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct CaptureOpt {
    /// Input model in .obj or .ply format. Its vertices are the points of the dataset.
    #[structopt(name = "MODEL", parse(from_os_str))]
    model: PathBuf,

    /// Folder images are written to. Created if it does not exist.
    #[structopt(name = "OUTDIR", parse(from_os_str))]
    output: PathBuf,

    /// Kind of image to capture: photo, silhouette or depth.
    #[structopt(long = "mode", default_value = "photo")]
    mode: Mode,

    /// Image width in pixels.
    #[structopt(long = "width", default_value = "640")]
    width: usize,

    /// Image height in pixels.
    #[structopt(long = "height", default_value = "480")]
    height: usize,

    /// Focal length in pixels.
    #[structopt(long = "focal", default_value = "525")]
    focal: f64,

    /// Distance of the near clip plane.
    #[structopt(long = "near", default_value = "0.1")]
    near: f64,

    /// Distance of the far clip plane.
    #[structopt(long = "far", default_value = "100")]
    far: f64,

    /// First radial distortion coefficient. Can be changed per view from a script.
    #[structopt(long = "k1", default_value = "0", allow_hyphen_values = true)]
    k1: f64,

    /// Second radial distortion coefficient.
    #[structopt(long = "k2", default_value = "0", allow_hyphen_values = true)]
    k2: f64,

    /// Move the model so that its bounding box is centered on the origin.
    #[structopt(long = "center")]
    center: bool,

    /// Half width in pixels of the squares drawn for models without faces.
    #[structopt(long = "point-size", default_value = "0")]
    point_size: usize,

    /// Viewpoint script with look_at, distortion and capture commands.
    #[structopt(
        long = "script",
        parse(from_os_str),
        conflicts_with = "orbit",
        required_unless = "orbit"
    )]
    script: Option<PathBuf>,

    /// Capture this many views from random points on a sphere around the model.
    #[structopt(long = "orbit")]
    orbit: Option<usize>,

    /// Radius of the orbit sphere. Defaults to 3 times the radius of the model.
    #[structopt(long = "radius")]
    radius: Option<f64>,

    /// Random seed for orbit viewpoints.
    #[structopt(long = "seed", default_value = "0")]
    seed: u64,

    /// Output dataset in .sfm or .bsfm format. Defaults to <OUTDIR>/dataset.sfm.
    #[structopt(long = "dataset", parse(from_os_str))]
    dataset: Option<PathBuf>,

    /// Do not show progress bars.
    #[structopt(long = "quiet")]
    quiet: bool,
}

#[derive(StructOpt, Debug)]
struct CheckOpt {
    /// Dataset in .sfm or .bsfm format.
    #[structopt(name = "DATASET", parse(from_os_str))]
    input: PathBuf,
}

#[derive(StructOpt, Debug)]
struct PLYOpt {
    /// Dataset in .sfm or .bsfm format.
    #[structopt(name = "DATASET", parse(from_os_str))]
    input: PathBuf,

    /// Output file in .ply format.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "sfmgen",
    about = "Tools for generating synthetic structure-from-motion datasets."
)]
enum Opt {
    /// Render a model from many viewpoints and record which points each view sees.
    Capture(CaptureOpt),
    /// Print statistics and reprojection error of a dataset.
    Check(CheckOpt),
    /// Convert a dataset to a .ply for visualization.
    PLY(PLYOpt),
}

fn run_capture(opt: CaptureOpt) -> Result<(), sfmgen::Error> {
    let mut model = import_model(&opt.model)?;
    if opt.center {
        model = model.centered();
    }
    println!(
        "Loaded model with {} points and {} triangles",
        model.num_points(),
        model.triangles.len()
    );

    let commands = match (&opt.script, opt.orbit) {
        (Some(path), _) => load_script(path)?,
        (None, Some(n)) => {
            let radius = opt.radius.unwrap_or(3.0 * model.radius());
            orbit_commands(model.center(), radius, n, opt.seed)
        }
        (None, None) => {
            return Err(sfmgen::Error::ParseError(
                "one of --script or --orbit is required".to_string(),
            ))
        }
    };

    std::fs::create_dir_all(&opt.output)?;
    let mut renderer = Rasterizer::new(
        &model,
        opt.width,
        opt.height,
        Vector2::new(opt.focal, opt.focal),
    )
    .with_clip(opt.near, opt.far)
    .with_point_size(opt.point_size);
    let mut session = Session::new(&model.points, opt.output.clone(), opt.mode);
    session.set_distortion(Distortion::new(opt.k1, opt.k2));

    let mut data = SfmData::new();
    run_commands(&mut renderer, &mut session, &mut data, &commands, !opt.quiet)?;
    println!(
        "Captured {} views with {} observations",
        data.num_views(),
        data.num_observations()
    );

    let dataset = match opt.dataset {
        Some(path) => path,
        None => opt.output.join("dataset.sfm"),
    };
    data.write(&dataset, &model.points)?;
    println!("Wrote dataset to {}", dataset.display());
    Ok(())
}

fn run_check(opt: CheckOpt) -> Result<(), sfmgen::Error> {
    let (data, points) = SfmData::from_file(&opt.input)?;
    println!("{} of {} points", data, points.len());
    println!(
        "Total reprojection error: {:.2e} (L1) {:.2e} (L2)",
        data.total_reprojection_error(&points, 1.),
        data.total_reprojection_error(&points, 2.)
    );
    Ok(())
}

fn run_ply(opt: PLYOpt) -> Result<(), sfmgen::Error> {
    let (data, points) = SfmData::from_file(&opt.input)?;
    data.write_ply(&opt.out, &points)
}

fn main() -> Result<(), sfmgen::Error> {
    env_logger::init();
    match Opt::from_args() {
        Opt::Capture(opt) => run_capture(opt),
        Opt::Check(opt) => run_check(opt),
        Opt::PLY(opt) => run_ply(opt),
    }
}
