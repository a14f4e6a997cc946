extern crate byteorder;
extern crate cgmath;
extern crate image;
extern crate itertools;
extern crate log;
extern crate nom;
extern crate rayon;
extern crate thiserror;

pub mod camera;
pub mod capture;
pub mod depth_cache;
pub mod generate;
pub mod model;
pub mod raster;
pub mod renderer;
pub mod script;
pub mod sfmdata;
pub mod visibility;

pub use camera::{Camera, Distortion, Viewpoint};
pub use capture::{Mode, Session};
pub use model::{import_model, Model};
pub use raster::Rasterizer;
pub use renderer::Renderer;
pub use sfmdata::{Observation, SfmData, View, ViewSink};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("could not write image {}: {source}", .path.display())]
    ImageError {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("model error: {0}")]
    ModelError(String),
    #[error("empty dataset: {0}")]
    EmptyDataset(String),
}

impl<I: std::fmt::Debug> From<nom::Err<I>> for Error {
    fn from(e: nom::Err<I>) -> Self {
        Error::ParseError(format!("{:?}", e))
    }
}
