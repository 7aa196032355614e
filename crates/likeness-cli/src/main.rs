use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::{DetectorMode, EmbeddingStore, EnrollOutcome, LazyOnnxEncoder, MatchEngine};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "likeness", about = "Enroll faces and recognize them in images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in an image under a name
    Enroll {
        /// Name to store the face under
        #[arg(short, long)]
        name: String,
        /// Image containing exactly one face (JPEG/PNG)
        #[arg(short, long)]
        image: PathBuf,
        /// Detector mode: fast or accurate
        #[arg(short, long)]
        mode: Option<DetectorMode>,
    },
    /// Recognize every face in an image
    Recognize {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        mode: Option<DetectorMode>,
        /// Maximum distance for a match (lower = stricter)
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List enrolled identities
    List,
    /// Delete every enrolled face
    Clear,
    /// Write the raw store file somewhere else
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    // Models load on the first detection, so list/clear/export never need them.
    let mut engine = MatchEngine::new(
        LazyOnnxEncoder::new(&config.model_dir),
        EmbeddingStore::new(&config.store_path),
    );

    match cli.command {
        Commands::Enroll { name, image, mode } => {
            let mode = mode.unwrap_or(config.detector_mode);
            let bytes = read_image(&image)?;

            match engine.enroll(&name, &bytes, mode)? {
                EnrollOutcome::Enrolled { label, location, total_records } => {
                    println!(
                        "Enrolled '{label}' (face at top={} right={} bottom={} left={}); {total_records} records stored",
                        location.top, location.right, location.bottom, location.left
                    );
                }
                EnrollOutcome::NoFaceDetected => {
                    anyhow::bail!("no face detected; try a frontal, well-lit photo");
                }
                EnrollOutcome::MultipleFacesDetected(locations) => {
                    for l in &locations {
                        println!("? top={} right={} bottom={} left={}", l.top, l.right, l.bottom, l.left);
                    }
                    anyhow::bail!(
                        "{} faces detected; enroll from a photo with exactly one face",
                        locations.len()
                    );
                }
            }
        }
        Commands::Recognize { image, mode, tolerance, json } => {
            let mode = mode.unwrap_or(config.detector_mode);
            let tolerance = tolerance.unwrap_or(config.tolerance);
            let bytes = read_image(&image)?;

            let results = engine.recognize(&bytes, mode, tolerance)?;
            if json {
                let out: Vec<_> = results
                    .iter()
                    .map(|(location, result)| {
                        serde_json::json!({ "location": location, "result": result })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if results.is_empty() {
                println!("No faces detected");
            } else {
                for (l, result) in &results {
                    println!("- {result} at top={} right={} bottom={} left={}", l.top, l.right, l.bottom, l.left);
                }
            }
        }
        Commands::List => {
            println!("Enrolled records: {}", engine.record_count()?);
            let identities = engine.list_identities()?;
            if !identities.is_empty() {
                println!("{}", identities.into_iter().collect::<Vec<_>>().join(", "));
            }
        }
        Commands::Clear => {
            engine.clear_store()?;
            println!("Store cleared");
        }
        Commands::Export { output } => {
            let raw = engine.export_store()?;
            std::fs::write(&output, &raw)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Exported {} bytes to {}", raw.len(), output.display());
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}
