use criterion::{criterion_group, criterion_main, Criterion};

use slideshot::rendering::{CaptureOptions, FullLayoutRasterizer, Rasterizer, ScreenshotRasterizer};
use slideshot::surface::{RenderSurface, SlideDocument, Stylesheet};
use slideshot::RenderConfig;

const SLIDE: &str = r#"<h1>Quarterly <span class="highlight">review</span></h1>
<h2>What moved the needle</h2>
<p>Shipped <strong>three</strong> launches, cut onboarding time in half and
kept the error budget intact.</p>
<div class="ai-image"></div>
<p><span class="cta">Read the full report</span></p>"#;

fn settled_surface() -> RenderSurface {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let surface = RenderSurface::new(&RenderConfig::default());
    surface.mount(SLIDE);
    runtime.block_on(surface.await_settled());
    surface
}

fn bench_capture(c: &mut Criterion) {
    let surface = settled_surface();
    let frame = surface.frame();
    let options = CaptureOptions::default();

    c.bench_function("capture_full_layout", |b| {
        b.iter(|| FullLayoutRasterizer.capture(&frame, &options).unwrap())
    });
    c.bench_function("capture_screenshot", |b| {
        b.iter(|| ScreenshotRasterizer.capture(&frame, &options).unwrap())
    });
}

fn bench_markup(c: &mut Criterion) {
    let sheet = Stylesheet::default();
    c.bench_function("parse_and_serialize", |b| {
        b.iter(|| SlideDocument::parse(SLIDE).to_html(&sheet, 1080, 1920))
    });
}

criterion_group!(benches, bench_capture, bench_markup);
criterion_main!(benches);
