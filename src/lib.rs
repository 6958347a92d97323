pub mod calibration;
pub mod geometry_utils;
pub mod homography;
pub mod monitor_config;
pub mod polygon;
pub mod session;
pub mod store;
pub mod systems;
pub mod tracking;
pub mod video_interface;

pub type Point2D = (f64, f64);
