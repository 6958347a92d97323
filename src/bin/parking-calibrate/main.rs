use anyhow::{Context, anyhow};
use clap::Parser;
use env_logger::Env;
use log::debug;

use parking_occupancy::{
    calibration::{CalibrationSession, ImageBounds},
    monitor_config::load_config_from_file,
    store::JsonStore,
    systems::position_remapping::PositionRemapping,
};

use crate::cli::{Cli, Command};

mod cli;

/// "1920x1080" → bounds
fn parse_size(text: &str) -> anyhow::Result<ImageBounds> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got \"{}\"", text))?;
    Ok(ImageBounds::new(
        w.trim().parse().context("invalid width")?,
        h.trim().parse().context("invalid height")?,
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    let config = load_config_from_file(&cli.config_path)?;
    let store = JsonStore::open(&cli.store_path)
        .with_context(|| format!("failed to open store at {}", cli.store_path))?;

    let frame_bounds = cli.frame_size.as_deref().map(parse_size).transpose()?;
    let map_bounds = cli.map_size.as_deref().map(parse_size).transpose()?;

    let mut calibration = CalibrationSession::new(store, cli.camera_id, config.ransac_settings())
        .with_bounds(frame_bounds, map_bounds);

    match cli.command {
        Command::Add {
            src_x,
            src_y,
            dst_x,
            dst_y,
        } => {
            let id = calibration.add_correspondence((src_x, src_y), (dst_x, dst_y))?;
            println!("Added point pair {}", id);
        }
        Command::Update {
            id,
            src_x,
            src_y,
            dst_x,
            dst_y,
        } => {
            calibration.update_correspondence(id, (src_x, src_y), (dst_x, dst_y))?;
            println!("Updated point pair {}", id);
        }
        Command::Delete { id } => {
            calibration.delete_correspondence(id)?;
            println!("Deleted point pair {}", id);
        }
        Command::Clear => {
            let removed = calibration.clear_correspondences()?;
            println!("Removed {} point pairs", removed);
        }
        Command::List => {
            let pairs = calibration.correspondences();
            if pairs.is_empty() {
                println!("No point pairs for camera {}", cli.camera_id);
            }
            for (id, c) in pairs {
                println!(
                    "{:>4}: ({:.1}, {:.1}) -> ({:.1}, {:.1})",
                    id, c.source.0, c.source.1, c.destination.0, c.destination.1
                );
            }
        }
        Command::Compute => {
            let estimate = calibration.recompute_homography()?;
            println!("Homography:");
            for row in estimate.homography.to_array() {
                println!("  [{:>14.6}, {:>14.6}, {:>14.6}]", row[0], row[1], row[2]);
            }
            println!(
                "Inliers: {}/{} ({:.0}%), mean reprojection error {:.3}px",
                estimate.inlier_count(),
                estimate.correspondences.len(),
                estimate.inlier_ratio() * 100.,
                estimate.mean_inlier_error()
            );
            for ((c, error), inlier) in estimate
                .correspondences
                .iter()
                .zip(estimate.errors.iter())
                .zip(estimate.inliers.iter())
            {
                println!(
                    "  ({:.1}, {:.1}) -> ({:.1}, {:.1}): {:.3}px{}",
                    c.source.0,
                    c.source.1,
                    c.destination.0,
                    c.destination.1,
                    error,
                    if *inlier { "" } else { " (outlier)" }
                );
            }
        }
        Command::Project { x, y, inverse } => {
            let estimate = calibration.recompute_homography()?;
            let remapping = PositionRemapping::new(Some(estimate.homography))?;
            let (px, py) = if inverse {
                remapping.map_to_camera((x, y))?
            } else {
                remapping.camera_to_map((x, y))?
            };
            println!("({:.2}, {:.2}) -> ({:.2}, {:.2})", x, y, px, py);
        }
    }

    Ok(())
}
