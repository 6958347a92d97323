use clap::{Parser, Subcommand};

const CONFIG_FILE_PATH: &str = "./monitor.json";
const STORE_FILE_PATH: &str = "./parking.json";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Camera whose calibration points are edited
    #[arg(long = "cameraId")]
    pub camera_id: i64,

    #[arg(long="monitorConfigPath",default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    #[arg(long="storePath",default_value_t=String::from(STORE_FILE_PATH))]
    pub store_path: String,

    /// Reject camera points outside a frame of this size, e.g. 1920x1080
    #[arg(long = "frameSize")]
    pub frame_size: Option<String>,

    /// Reject map points outside a map image of this size, e.g. 1000x800
    #[arg(long = "mapSize")]
    pub map_size: Option<String>,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a camera point and its matching map point
    Add {
        src_x: f64,
        src_y: f64,
        dst_x: f64,
        dst_y: f64,
    },
    /// Replace both points of an existing pair
    Update {
        id: i64,
        src_x: f64,
        src_y: f64,
        dst_x: f64,
        dst_y: f64,
    },
    /// Remove one pair
    Delete { id: i64 },
    /// Remove every pair for the camera
    Clear,
    /// List the camera's pairs
    List,
    /// Compute the homography and report how well it fits
    Compute,
    /// Project a camera point onto the map (or back, with --inverse)
    Project {
        x: f64,
        y: f64,
        #[arg(long = "inverse")]
        inverse: bool,
    },
}
