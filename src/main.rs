use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use slideshot::images::http::{HttpImageEndpoint, PollinationsBackend};
use slideshot::images::{ImageClient, ImageEndpoint, ImageProvisioner};
use slideshot::rendering::{CaptureEngine, CaptureOptions};
use slideshot::resolver::ResolutionOutcome;
use slideshot::{RenderConfig, SlideRenderer};

#[derive(Parser, Debug)]
#[command(name = "slideshot", about = "Render a slide markup file to a PNG")]
struct Args {
    /// Slide markup file
    input: PathBuf,

    /// Output PNG path
    #[arg(short, long, default_value = "slide.png")]
    output: PathBuf,

    /// Capture engine: auto, full-layout or screenshot
    #[arg(long, default_value = "auto")]
    engine: CaptureEngine,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device pixel ratio of the output bitmap
    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f32,

    /// Send image requests to the configured HTTP endpoint instead of
    /// provisioning in-process
    #[arg(long)]
    remote: bool,
}

fn init_logging() {
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(filter) => builder.parse_filters(&filter),
        Err(_) => builder.filter_level(log::LevelFilter::Info),
    };
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RenderConfig::from_file(path)?,
        None => RenderConfig::default(),
    };
    let markup = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let endpoint: Arc<dyn ImageEndpoint> = if args.remote {
        Arc::new(HttpImageEndpoint::new(&config)?)
    } else {
        let backend = Arc::new(PollinationsBackend::new(&config)?);
        Arc::new(ImageProvisioner::new(backend, &config.cache))
    };
    let renderer = SlideRenderer::new(&config, ImageClient::new(endpoint, &config.cache));

    let outcomes = renderer.prepare(&markup).await;
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, ResolutionOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        warn!("{} placeholder(s) failed and render an error indicator", failed);
    }

    let options = CaptureOptions {
        width: config.viewport.width,
        height: config.viewport.height,
        pixel_ratio: args.pixel_ratio,
        engine: args.engine,
        ..CaptureOptions::default()
    };
    let capture = slideshot::rendering::capture(renderer.surface(), &options).await?;
    std::fs::write(&args.output, capture.to_png()?)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        "wrote {}x{} capture to {}",
        capture.width,
        capture.height,
        args.output.display()
    );
    Ok(())
}
