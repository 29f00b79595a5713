use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facenet_core::{
    EmbeddingRequest, EmbeddingResult, FrameGate, MediaSource, Session, SimilarityResult,
    VisionProvider,
};
use facenet_onnx::OnnxProvider;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facenet", about = "On-device face detection and comparison")]
struct Cli {
    /// TOML config file (FACENET_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image and print them as JSON
    Detect {
        image: PathBuf,
    },
    /// Embed the most confident face in an image and print the vector as JSON
    Embed {
        image: PathBuf,
    },
    /// Compare a reference photo against a sequence of video frames
    Compare {
        /// Reference photo
        reference: PathBuf,
        /// Frames, in capture order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Similarity threshold for a match (overrides config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let provider: Arc<dyn VisionProvider> = Arc::new(OnnxProvider::new());

    match cli.command {
        Commands::Detect { image } => {
            let session = Session::new(config.image_session(false), provider);
            session.initialize().await?;
            let img = load_image(&image)?;
            let detections = session.detect(MediaSource::Image(&img), None).await?;
            println!("{}", serde_json::to_string_pretty(&detections)?);
        }
        Commands::Embed { image } => {
            let session = Session::new(config.image_session(true), provider);
            session.initialize().await?;
            let img = load_image(&image)?;
            let result = embed_still(&session, &img)
                .await?
                .with_context(|| format!("no face detected in {}", image.display()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Compare {
            reference,
            frames,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(config.match_threshold);
            compare(&config, provider, &reference, frames, threshold).await?;
        }
    }

    Ok(())
}

fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8())
}

/// Detect, then embed the first detection. `None` when no face is found.
async fn embed_still(session: &Session, img: &RgbImage) -> Result<Option<EmbeddingResult>> {
    let source = MediaSource::Image(img);
    let detections = session.detect(source, None).await?;
    let Some(first) = detections.first() else {
        return Ok(None);
    };
    Ok(session.embed(EmbeddingRequest::new(source, first)).await?)
}

/// Reference photo through an IMAGE session, frames through a VIDEO session.
///
/// Frames are offered at a fixed pace; a frame that arrives while the
/// previous one is still being processed is dropped.
async fn compare(
    config: &Config,
    provider: Arc<dyn VisionProvider>,
    reference: &Path,
    frames: Vec<PathBuf>,
    threshold: f32,
) -> Result<()> {
    let reference_session = Session::new(config.image_session(true), Arc::clone(&provider));
    let stream_session = Arc::new(Session::new(config.video_session(), provider));
    tokio::try_join!(reference_session.initialize(), stream_session.initialize())?;

    let reference_img = load_image(reference)?;
    let Some(reference_embedding) = embed_still(&reference_session, &reference_img).await? else {
        bail!("no face detected in the reference photo {}", reference.display());
    };
    let reference_embedding = Arc::new(reference_embedding);

    let gate = FrameGate::new();
    let mut pacing = tokio::time::interval(Duration::from_millis(config.frame_interval_ms.max(1)));
    let started = Instant::now();
    let mut in_flight = JoinSet::new();

    for path in frames {
        pacing.tick().await;
        let timestamp = started.elapsed();

        let Some(guard) = gate.try_enter() else {
            tracing::debug!(frame = %path.display(), "previous frame still in flight; dropping");
            continue;
        };

        let session = Arc::clone(&stream_session);
        let reference_embedding = Arc::clone(&reference_embedding);
        in_flight.spawn(async move {
            let _guard = guard;
            let result = process_frame(&session, &path, timestamp, &reference_embedding, threshold).await;
            (path, result)
        });
    }

    let mut best: Option<(PathBuf, SimilarityResult)> = None;
    while let Some(joined) = in_flight.join_next().await {
        let (path, result) = joined.context("frame task panicked")?;
        match result {
            Ok(Some(similarity)) => {
                println!(
                    "{}: {} ({})",
                    path.display(),
                    similarity.message,
                    if similarity.is_match { "match" } else { "no match" }
                );
                if best.as_ref().map_or(true, |(_, b)| similarity.score > b.score) {
                    best = Some((path, similarity));
                }
            }
            Ok(None) => println!("{}: no face", path.display()),
            Err(err) => {
                tracing::warn!(frame = %path.display(), error = %err, "frame failed");
                println!("{}: error: {err:#}", path.display());
            }
        }
    }

    if gate.dropped() > 0 {
        println!("dropped {} frame(s) while busy", gate.dropped());
    }
    match best {
        Some((path, similarity)) => println!(
            "best: {}: {} ({})",
            path.display(),
            similarity.message,
            if similarity.is_match { "match" } else { "no match" }
        ),
        None => println!("best: no face found in any frame"),
    }

    Ok(())
}

/// Decode one frame and score it; decode failures are reported like inference failures.
async fn process_frame(
    session: &Session,
    path: &Path,
    timestamp: Duration,
    reference: &EmbeddingResult,
    threshold: f32,
) -> Result<Option<SimilarityResult>> {
    let frame = load_image(path)?;
    score_frame(session, &frame, timestamp, reference, threshold).await
}

async fn score_frame(
    session: &Session,
    frame: &RgbImage,
    timestamp: Duration,
    reference: &EmbeddingResult,
    threshold: f32,
) -> Result<Option<SimilarityResult>> {
    let source = MediaSource::Video(frame);
    let detections = session.detect(source, Some(timestamp)).await?;
    let Some(first) = detections.first() else {
        return Ok(None);
    };
    let Some(embedding) = session
        .embed(EmbeddingRequest::new(source, first).at(timestamp))
        .await?
    else {
        return Ok(None);
    };
    match SimilarityResult::from_results(reference, &embedding, threshold) {
        Some(result) => Ok(Some(result?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_compare() {
        let cli = Cli::try_parse_from([
            "facenet", "compare", "ref.jpg", "f1.png", "f2.png", "--threshold", "0.6",
        ])
        .unwrap();
        match cli.command {
            Commands::Compare { reference, frames, threshold } => {
                assert_eq!(reference, PathBuf::from("ref.jpg"));
                assert_eq!(frames.len(), 2);
                assert_eq!(threshold, Some(0.6));
            }
            _ => panic!("expected compare"),
        }
    }

    #[tokio::test]
    async fn test_unreadable_frame_is_a_frame_error() {
        let session = Session::new(Config::default().video_session(), Arc::new(OnnxProvider::new()));
        let reference = EmbeddingResult {
            embeddings: vec![facenet_core::Embedding::new(vec![1.0, 0.0])],
            timestamp: None,
        };
        let err = process_frame(
            &session,
            Path::new("/nonexistent/frame-0001.png"),
            Duration::from_millis(33),
            &reference,
            0.5,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("opening /nonexistent/frame-0001.png"));
    }

    #[test]
    fn test_cli_compare_requires_frames() {
        assert!(Cli::try_parse_from(["facenet", "compare", "ref.jpg"]).is_err());
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::try_parse_from(["facenet", "detect", "a.jpg", "--config", "f.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("f.toml")));
    }
}
