//! facemesh_image - face mesh on still images
//!
//! Runs the solution in static-image mode over image files (or directories of them),
//! prints landmark counts and optionally writes annotated copies.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use facemesh::ingest::ImageSequenceSource;
use facemesh::render::{Canvas, FaceMeshRenderer};
use facemesh::{CameraFrame, FaceMesh, FaceMeshConfig, FaceMeshResult};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "facemesh_image",
    version,
    about = "Detect face meshes in still images"
)]
struct Args {
    /// Image files or directories of images.
    #[arg(required = true, value_name = "PATH")]
    inputs: Vec<PathBuf>,

    /// Write annotated images to this directory.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Maximum faces per image.
    #[arg(long)]
    max_faces: Option<usize>,

    /// Iris landmark refinement (true|false).
    #[arg(long, value_name = "BOOL")]
    refine: Option<bool>,

    /// ONNX face landmark model (requires the backend-tract feature).
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Draw every landmark, not only the contours.
    #[arg(long)]
    points: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct ImageReport {
    path: String,
    result: FaceMeshResult,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(&args.ui, is_tty, !stdout_is_tty)?;

    let mut config = FaceMeshConfig::load()?;
    config.options.static_image_mode = true;
    if let Some(max_faces) = args.max_faces {
        config.options.max_num_faces = max_faces;
    }
    if let Some(refine) = args.refine {
        config.options.refine_landmarks = refine;
    }
    if let Some(model) = &args.model {
        config.backend.model_path = Some(model.clone());
    }
    config.validate()?;

    let mut face_mesh = {
        let _stage = ui.stage("Load face mesh");
        FaceMesh::new(config.options.clone(), &config.backend_registry()?)?
    };
    let renderer = FaceMeshRenderer::new().with_points(args.points);
    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("create output directory {}", out.display()))?;
    }

    let images = collect_images(&args.inputs)?;
    let mut reports = Vec::new();
    let mut failures = 0usize;
    {
        let mut stage = ui.stage("Process images");
        for (index, path) in images.iter().enumerate() {
            stage.set_detail(&format!("{}/{} {}", index + 1, images.len(), path.display()));
            match process_image(&mut face_mesh, &renderer, path, index as u64 + 1, args.out.as_deref()) {
                Ok(result) => reports.push(ImageReport {
                    path: path.display().to_string(),
                    result,
                }),
                Err(err) => {
                    failures += 1;
                    log::error!("{}: {:#}", path.display(), err);
                }
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let landmarks: usize = report.result.faces.iter().map(|f| f.landmarks.len()).sum();
            println!(
                "{}: {} face(s), {} landmarks",
                report.path,
                report.result.faces.len(),
                landmarks
            );
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} images failed", failures, images.len()));
    }
    Ok(())
}

fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            images.extend(ImageSequenceSource::list_images(input)?);
        } else {
            images.push(input.clone());
        }
    }
    if images.is_empty() {
        return Err(anyhow!("no images to process"));
    }
    Ok(images)
}

fn process_image(
    face_mesh: &mut FaceMesh,
    renderer: &FaceMeshRenderer,
    path: &Path,
    sequence: u64,
    out: Option<&Path>,
) -> Result<FaceMeshResult> {
    let image = image::open(path)
        .with_context(|| format!("decode image {}", path.display()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    let frame = CameraFrame::from_rgb(image.into_raw(), width, height, sequence)?;
    let result = face_mesh.process(&frame.view())?;

    if let Some(out) = out {
        let mut canvas = Canvas::new(width, height);
        canvas.blit_frame(&frame.view());
        renderer.render(&mut canvas, &result);
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image");
        let target = out.join(format!("{}_mesh.png", stem));
        canvas
            .image()
            .save(&target)
            .with_context(|| format!("write {}", target.display()))?;
    }
    Ok(result)
}
