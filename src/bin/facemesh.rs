//! facemesh - live face mesh from a camera
//!
//! This binary:
//! 1. Loads configuration (FACEMESH_CONFIG + FACEMESH_* env, then flags)
//! 2. Resolves camera permission and creates the session
//! 3. Resumes (starts the camera) and runs until --seconds elapse or Ctrl-C
//! 4. Pauses (releases the camera) and prints a summary

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use facemesh::{
    CameraFacing, FaceMeshConfig, PermissionMode, Session, SessionParts, SolutionSurface,
};

#[path = "../ui.rs"]
mod ui;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    name = "facemesh",
    version,
    about = "Run the face mesh pipeline on a live camera"
)]
struct Args {
    /// Stop after this many seconds (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    seconds: u64,

    /// Camera device for the selected facing (stub://…, dir://…, /dev/videoN).
    #[arg(long)]
    device: Option<String>,

    /// Camera facing (front|rear).
    #[arg(long)]
    facing: Option<String>,

    /// ONNX face landmark model (requires the backend-tract feature).
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Write annotated frames to this directory.
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Request GPU execution (true|false).
    #[arg(long, value_name = "BOOL")]
    gpu: Option<bool>,

    /// Iris landmark refinement (true|false).
    #[arg(long, value_name = "BOOL")]
    refine: Option<bool>,

    /// Behave as if camera permission was refused.
    #[arg(long)]
    deny_permission: bool,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(&args.ui, is_tty, !stdout_is_tty)?;

    let config = {
        let _stage = ui.stage("Load configuration");
        let mut config = FaceMeshConfig::load()?;
        apply_args(&mut config, &args)?;
        config.validate()?;
        config
    };
    log::info!(
        "camera {} ({}, {}x{} @ {} fps)",
        config.camera.device(),
        config.camera.facing,
        config.camera.width,
        config.camera.height,
        config.camera.target_fps
    );

    let mut session = {
        let _stage = ui.stage("Create session");
        let permission = args.deny_permission.then_some(PermissionMode::Deny);
        Session::create(SessionParts::from_config(&config, permission)?)?
    };
    if let Some(notice) = session.surface().notice() {
        eprintln!("notice: {}", notice);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    if session.resume()? {
        let mut stage = ui.stage("Stream");
        let started = Instant::now();
        let limit = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
        loop {
            if rx.recv_timeout(POLL_INTERVAL).is_ok() {
                log::info!("shutdown signal received");
                break;
            }
            if limit.map(|limit| started.elapsed() >= limit).unwrap_or(false) {
                break;
            }
            let report = session.report();
            stage.set_detail(&format!(
                "{} captured, {} presented, {} drawn, {} dropped, {} errors",
                report.frames_captured,
                report.results_presented,
                report.frames_drawn,
                report.frames_dropped,
                report.errors_logged
            ));
        }
        session.pause()?;
    }

    let report = session.shutdown()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("facemesh summary");
        println!("  permission:        {:?}", report.permission);
        println!("  camera starts:     {}", report.camera_starts);
        println!("  camera closes:     {}", report.camera_closes);
        println!("  frames captured:   {}", report.frames_captured);
        println!("  frames sent:       {}", report.frames_sent);
        println!("  results presented: {}", report.results_presented);
        println!("  errors logged:     {}", report.errors_logged);
        println!("  frames dropped:    {}", report.frames_dropped);
        println!("  frames drawn:      {}", report.frames_drawn);
        println!("  notices drawn:     {}", report.notices_drawn);
        if let Some(notice) = &report.notice {
            println!("  notice:            {}", notice);
        }
    }
    Ok(())
}

fn apply_args(config: &mut FaceMeshConfig, args: &Args) -> Result<()> {
    if let Some(facing) = &args.facing {
        config.camera.facing = facing.parse()?;
    }
    if let Some(device) = &args.device {
        match config.camera.facing {
            CameraFacing::Front => config.camera.devices.front = device.clone(),
            CameraFacing::Rear => config.camera.devices.rear = device.clone(),
        }
    }
    if let Some(model) = &args.model {
        config.backend.model_path = Some(model.clone());
    }
    if let Some(dir) = &args.snapshot_dir {
        config.render.snapshot_dir = Some(dir.clone());
    }
    if let Some(gpu) = args.gpu {
        config.options.run_on_gpu = gpu;
    }
    if let Some(refine) = args.refine {
        config.options.refine_landmarks = refine;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_selected_camera() -> Result<()> {
        let args = Args::parse_from([
            "facemesh",
            "--facing",
            "rear",
            "--device",
            "stub://back",
            "--gpu",
            "false",
            "--refine",
            "false",
        ]);
        let mut config = FaceMeshConfig::default();
        apply_args(&mut config, &args)?;
        assert_eq!(config.camera.facing, CameraFacing::Rear);
        assert_eq!(config.camera.devices.rear, "stub://back");
        assert!(!config.options.run_on_gpu);
        assert!(!config.options.refine_landmarks);
        Ok(())
    }
}
