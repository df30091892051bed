mod common;

use std::fs;
use std::path::PathBuf;

use common::fast_config;
use slideshot::rendering::{capture, CaptureEngine, CaptureOptions};
use slideshot::surface::RenderSurface;

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from("tests/goldens/expected");
    p.push(name);
    p
}

async fn render_fixture(page: &str, engine: CaptureEngine) -> String {
    let markup = fs::read_to_string(format!("tests/goldens/pages/{}.html", page)).expect("read fixture");
    let surface = RenderSurface::new(&fast_config());
    surface.mount(&markup);
    surface.await_settled().await;
    let options = CaptureOptions {
        engine,
        ..CaptureOptions::default()
    };
    capture(&surface, &options).await.expect("capture").digest()
}

/// Compare against `expected/{page}.{engine}.sha256`. A missing golden is
/// only tolerated when `required` is false.
async fn check_golden(page: &str, engine: CaptureEngine, required: bool) {
    let digest = render_fixture(page, engine).await;
    assert_eq!(digest, render_fixture(page, engine).await, "capture must be deterministic");

    let expected_path = golden_path(&format!("{}.{}.sha256", page, engine));
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all("tests/goldens/expected").ok();
        fs::write(&expected_path, format!("{}\n", digest)).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    if !expected_path.exists() {
        assert!(!required, "missing golden {:?}", expected_path);
        println!(
            "No golden at {:?}; run with UPDATE_GOLDENS=1 to create it. Skipping.",
            expected_path
        );
        return;
    }

    let expected = fs::read_to_string(&expected_path).expect("unable to read golden");
    assert_eq!(digest, expected.trim(), "{} via {}", page, engine);
}

#[tokio::test]
async fn blank_slide_matches_golden_in_both_engines() {
    check_golden("blank", CaptureEngine::FullLayout, true).await;
    check_golden("blank", CaptureEngine::Screenshot, true).await;
}

#[tokio::test]
async fn unavailable_image_frame_matches_golden() {
    check_golden("frame", CaptureEngine::Screenshot, true).await;
}

#[tokio::test]
async fn full_layout_matches_golden() {
    check_golden("slide1", CaptureEngine::FullLayout, false).await;
}

#[tokio::test]
async fn screenshot_matches_golden() {
    check_golden("slide1", CaptureEngine::Screenshot, false).await;
}
