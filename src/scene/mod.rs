//! Scene management

mod camera;
mod camera_controller;
mod graph;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use graph::*;
pub use transform::*;
