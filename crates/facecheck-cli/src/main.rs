mod config;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{adapters, DetectorBackend, DistanceMetric, ImageBlob, ModelName, OnnxCapability, Session, Slot};

use crate::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "facecheck", version, about = "Face comparison, extraction and attribute analysis")]
struct Cli {
    /// Recognition model (e.g. VGG-Face, Facenet512, ArcFace)
    #[arg(long, global = true)]
    model: Option<ModelName>,
    /// Face detector backend (e.g. opencv, retinaface)
    #[arg(long, global = true)]
    detector: Option<DetectorBackend>,
    /// Distance metric (cosine, euclidean, euclidean_l2)
    #[arg(long, global = true)]
    metric: Option<DistanceMetric>,
    /// Directory containing the ONNX model files
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the faces in two images
    Compare {
        image1: PathBuf,
        image2: PathBuf,
    },
    /// Extract and align the first face in an image
    Extract {
        image: PathBuf,
        /// Write the aligned face as PNG to this path
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Predict age, gender, emotion and race for the faces in an image
    Analyze {
        image: PathBuf,
    },
    /// List models, detectors, metrics and verification thresholds
    Models,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}

/// Execute one command. Analysis faults are rendered as results; only
/// unusable input files and output I/O errors come back as `Err`.
fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        model: cli.model,
        detector: cli.detector,
        metric: cli.metric,
        model_dir: cli.model_dir.clone(),
    };

    match cli.command {
        Commands::Models => {
            let listing = render::ModelListing::build();
            emit(cli.json, &listing, render::models)?;
        }
        Commands::Compare { image1, image2 } => {
            let config = Config::load(&overrides);
            let a = read_image(&image1)?;
            let b = read_image(&image2)?;

            let mut capability = onnx_capability(&config);
            let mut session = Session::new(config.configuration);
            session.set_image(Slot::A, a);
            session.set_image(Slot::B, b);

            let report = session.run(&mut capability);
            emit(cli.json, &report, render::session)?;
        }
        Commands::Extract { image, out } => {
            let config = Config::load(&overrides);
            let blob = read_image(&image)?;

            let mut capability = onnx_capability(&config);
            let result = adapters::extract(&mut capability, &blob.bytes, config.configuration.detector_backend);

            if let (Some(path), Some(face)) = (&out, &result.face_bytes) {
                std::fs::write(path, face).with_context(|| format!("writing {}", path.display()))?;
                tracing::info!(path = %path.display(), bytes = face.len(), "aligned face written");
            }
            emit(cli.json, &result, render::extraction)?;
        }
        Commands::Analyze { image } => {
            let config = Config::load(&overrides);
            let blob = read_image(&image)?;

            let mut capability = onnx_capability(&config);
            let result = adapters::analyze(&mut capability, &blob.bytes, config.configuration.detector_backend);
            emit(cli.json, &result, render::attributes)?;
        }
    }

    Ok(())
}

fn onnx_capability(config: &Config) -> OnnxCapability {
    tracing::debug!(
        model_dir = %config.model_dir.display(),
        threads = config.intra_threads,
        configuration = %config.configuration,
        "using ONNX capability"
    );
    OnnxCapability::new(config.model_dir.clone(), config.intra_threads)
}

fn read_image(path: &Path) -> Result<ImageBlob> {
    ImageBlob::from_path(path).with_context(|| format!("cannot use {}", path.display()))
}

/// Print `value` as JSON or through its text renderer.
fn emit<T: serde::Serialize>(json: bool, value: &T, text: impl Fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", render::json(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facecheck-cli-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(16, 16, Rgb(color)).save(path).unwrap();
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("facecheck").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_compare_without_models_still_succeeds() {
        let dir = scratch_dir("compare");
        let models = dir.join("models");
        std::fs::create_dir_all(&models).unwrap();
        let (a, b) = (dir.join("a.png"), dir.join("b.png"));
        write_png(&a, [200, 10, 10]);
        write_png(&b, [10, 10, 200]);

        let cli = parse(&[
            "--model-dir",
            models.to_str().unwrap(),
            "compare",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
        ]);
        assert!(run(cli).is_ok(), "missing models are reported inline");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_extract_and_analyze_without_models_still_succeed() {
        let dir = scratch_dir("extract");
        let image = dir.join("face.png");
        write_png(&image, [120, 90, 60]);
        let models = dir.join("models");
        let out = dir.join("aligned.png");

        let cli = parse(&[
            "--json",
            "--model-dir",
            models.to_str().unwrap(),
            "extract",
            image.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ]);
        assert!(run(cli).is_ok());
        assert!(!out.exists(), "no face, nothing written");

        let cli = parse(&["--model-dir", models.to_str().unwrap(), "analyze", image.to_str().unwrap()]);
        assert!(run(cli).is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unsupported_image_type_is_an_error() {
        let dir = scratch_dir("gif");
        let gif = dir.join("a.gif");
        let png = dir.join("b.png");
        std::fs::write(&gif, b"GIF89a").unwrap();
        write_png(&png, [1, 2, 3]);

        let cli = parse(&["compare", gif.to_str().unwrap(), png.to_str().unwrap()]);
        let err = run(cli).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported image type"), "{err:#}");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_image_file_is_an_error() {
        let dir = scratch_dir("missing");
        let cli = parse(&["analyze", dir.join("nope.jpg").to_str().unwrap()]);
        assert!(run(cli).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_flags_fail_to_parse() {
        assert!(Cli::try_parse_from(["facecheck", "--model", "Bogus", "models"]).is_err());
        assert!(Cli::try_parse_from(["facecheck", "--metric", "manhattan", "models"]).is_err());
        assert!(Cli::try_parse_from(["facecheck", "compare", "only-one.png"]).is_err());
    }

    #[test]
    fn test_flags_parse_case_insensitively() {
        let cli = parse(&["--model", "arcface", "--detector", "RetinaFace", "models"]);
        assert_eq!(cli.model, Some(ModelName::ArcFace));
        assert_eq!(cli.detector, Some(DetectorBackend::Retinaface));
        assert!(run(cli).is_ok());
    }
}
