//! End-to-end capture sessions: observer, coordinator and helper over one
//! bus, against fixture pages

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use blocksnap::capture::{CaptureMode, SessionState};
use blocksnap::detect::SemanticType;
use blocksnap::fixture::{FixtureOptions, FixturePage, FixtureSnapshotSource};
use blocksnap::handoff::{HandoffStore, MemoryHandoff};
use blocksnap::helper::{DeniedClipboard, MemoryClipboard};
use blocksnap::observer::{ObserverEvent, PageHost, ToastLevel};
use blocksnap::pipeline::{self, Pipeline};
use blocksnap::{CaptureConfig, Settings, Viewport};

const WAIT: Duration = Duration::from_secs(30);

const LONG_PAGE: &str = r#"<html><head><title>Changelog</title></head><body>
  <div style="left:0;top:0;width:400px;height:200px;background:#c00"></div>
  <div style="left:20px;top:180px;width:300px;height:400px;background:rgba(0,0,255,0.5)"></div>
  <div style="left:0;top:650px;width:400px;height:120px;background:#0a0"></div>
  <div style="left:50px;top:900px;width:100px;height:100px;background:#333"></div>
</body></html>"#;

const CARD_PAGE: &str = r#"<html><head><title>Shop</title></head><body>
  <article id="deal" class="card" style="left:40px;top:60px;width:200px;height:120px;background:#fe0;border-radius:10px">
    <img style="left:50px;top:70px;width:60px;height:60px;background:#00f">
  </article>
</body></html>"#;

fn fixture(html: &str, viewport: Viewport, dpr: f64) -> Arc<FixturePage> {
    let options = FixtureOptions { viewport, device_pixel_ratio: dpr, url: "https://example.test/page".into() };
    Arc::new(FixturePage::parse_with(html, options).expect("fixture parses"))
}

fn fast_settings() -> Settings {
    Settings {
        capture: CaptureConfig { settle_delay_ms: 10, ..Default::default() },
        ..Default::default()
    }
}

struct Harness {
    pipeline: Pipeline,
    page: Arc<FixturePage>,
    clipboard: MemoryClipboard,
    handoff: Arc<MemoryHandoff>,
}

fn start(page: Arc<FixturePage>, snapshots: FixtureSnapshotSource) -> Harness {
    let clipboard = MemoryClipboard::new();
    let handoff = Arc::new(MemoryHandoff::new());
    let pipeline =
        pipeline::launch(page.clone(), Arc::new(snapshots), clipboard.clone(), handoff.clone(), fast_settings());
    Harness { pipeline, page, clipboard, handoff }
}

fn digest(pixels: &[u8]) -> String {
    hex::encode(Sha256::digest(pixels))
}

fn toasts(events: &[ObserverEvent]) -> Vec<(ToastLevel, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ObserverEvent::Toast { level, message } => Some((*level, message.clone())),
            _ => None,
        })
        .collect()
}

fn statuses(events: &[ObserverEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            ObserverEvent::Progress(p) => Some(p.status),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_page_capture_reconstructs_the_page() {
    let page = fixture(LONG_PAGE, Viewport { width: 400.0, height: 300.0 }, 2.0);
    page.scroll_to(120.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::FullPage).expect("activate");
    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Ok(()));

    // four tiles at 0, 250, 500 and 700, then the scroll offset comes back
    assert_eq!(h.page.scroll_y(), 120.0);
    let states = statuses(&events);
    assert_eq!(states.iter().filter(|s| **s == SessionState::Capturing).count(), 4);
    assert_eq!(states.last(), Some(&SessionState::Done));
    assert!(toasts(&events).contains(&(ToastLevel::Success, "Full page captured!".to_string())));

    let record = h.handoff.take(Duration::from_secs(60)).expect("handoff").expect("record present");
    assert_eq!(record.metadata.label, "Full Page");
    assert_eq!(record.metadata.element_type, SemanticType::Section);
    assert_eq!((record.metadata.dimensions.width, record.metadata.dimensions.height), (400, 1000));
    assert_eq!(record.metadata.title, "Changelog");

    let stitched = record.image_data_url.decode(2.0).expect("decode");
    let expected = h.page.render_page();
    assert_eq!((stitched.width(), stitched.height()), (800, 2000));
    assert_eq!(digest(stitched.pixels()), digest(expected.pixels()));

    // clipboard received the same image before the handoff was written
    assert_eq!(h.clipboard.contents(), Some(record.image_data_url.to_bytes().expect("bytes")));
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn block_capture_crops_the_highlighted_block() {
    let page = fixture(CARD_PAGE, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::Block).expect("activate");
    h.pipeline.pointer_move(60.0, 80.0).expect("move");
    h.pipeline.click().expect("click");
    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Ok(()));

    let highlight = events.iter().find_map(|e| match e {
        ObserverEvent::Highlight(Some(summary)) => Some(summary.clone()),
        _ => None,
    });
    let highlight = highlight.expect("block highlighted");
    assert_eq!(highlight.label, "Deal");
    assert_eq!(highlight.semantic_type, SemanticType::Article);
    assert!(toasts(&events).contains(&(ToastLevel::Success, "Screenshot captured & copied!".to_string())));

    let record = h.handoff.take(Duration::from_secs(60)).expect("handoff").expect("record");
    let image = record.image_data_url.decode(1.0).expect("decode");
    assert_eq!((image.width(), image.height()), (200, 120));
    assert_eq!(image.pixel(0, 0), [0xff, 0xee, 0x00, 0xff]);
    assert_eq!(image.pixel(20, 20), [0x00, 0x00, 0xff, 0xff]);
    assert_eq!(record.metadata.label, "Deal");
    assert_eq!(record.metadata.url, "https://example.test/page");

    // success leaves capture mode
    assert_eq!(h.pipeline.next_event().await, Some(ObserverEvent::Highlight(None)));
    assert_eq!(h.pipeline.next_event().await, Some(ObserverEvent::Deactivated));
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_drags_are_ignored_and_regions_are_cropped() {
    let page = fixture(CARD_PAGE, Viewport { width: 400.0, height: 300.0 }, 2.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::Region).expect("activate");
    h.pipeline.select_region((100.0, 100.0), (108.0, 140.0)).expect("tiny drag");
    // dragged up and to the left
    h.pipeline.select_region((140.0, 150.0), (40.0, 60.0)).expect("drag");
    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Ok(()));

    let toasts = toasts(&events);
    assert!(toasts.contains(&(ToastLevel::Info, "Selection too small, drag again".to_string())));
    assert!(toasts.contains(&(ToastLevel::Success, "Region captured & copied!".to_string())));

    let record = h.handoff.take(Duration::from_secs(60)).expect("handoff").expect("record");
    assert_eq!(record.metadata.label, "Region Selection");
    assert_eq!((record.metadata.dimensions.width, record.metadata.dimensions.height), (100, 90));
    let image = record.image_data_url.decode(2.0).expect("decode");
    assert_eq!((image.width(), image.height()), (200, 180));
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tile_failure_fails_the_session_and_restores_scroll() {
    let page = fixture(LONG_PAGE, Viewport { width: 400.0, height: 300.0 }, 1.0);
    page.scroll_to(40.0);
    let snapshots = FixtureSnapshotSource::new(page.as_ref().clone()).failing_on(2);
    let mut h = start(page.clone(), snapshots);

    h.pipeline.activate(CaptureMode::FullPage).expect("activate");
    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Err("Failed to capture screenshot".to_string()));
    assert_eq!(statuses(&events).last(), Some(&SessionState::Failed));
    assert_eq!(h.page.scroll_y(), 40.0);
    assert!(h.handoff.take(Duration::from_secs(60)).expect("handoff").is_none());
    assert!(h.clipboard.contents().is_none());
    assert!(!h.pipeline.session_active());
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escape_cancels_a_running_session() {
    let tall = r#"<html><body><div style="left:0;top:0;width:400px;height:6000px;background:#eee"></div></body></html>"#;
    let page = fixture(tall, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::FullPage).expect("activate");
    loop {
        match h.pipeline.next_event().await.expect("event") {
            ObserverEvent::Progress(p) if p.status == SessionState::Capturing => break,
            _ => {}
        }
    }
    h.pipeline.escape().expect("escape");

    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Err("Capture cancelled".to_string()));
    assert!(events.contains(&ObserverEvent::Deactivated));
    assert_eq!(h.page.scroll_y(), 0.0);
    assert!(h.handoff.take(Duration::from_secs(60)).expect("handoff").is_none());
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clipboard_denial_does_not_fail_the_capture() {
    let page = fixture(CARD_PAGE, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let handoff = Arc::new(MemoryHandoff::new());
    let mut pipeline = pipeline::launch(
        page.clone(),
        Arc::new(FixtureSnapshotSource::new(page.as_ref().clone())),
        DeniedClipboard,
        handoff.clone(),
        fast_settings(),
    );

    pipeline.activate(CaptureMode::Visible).expect("activate");
    let (result, _) = pipeline.wait_for_capture(WAIT).await.expect("capture finished");
    assert_eq!(result, Ok(()));

    let record = handoff.take(Duration::from_secs(60)).expect("handoff").expect("record");
    assert_eq!(record.metadata.label, "Visible Page");
    let image = record.image_data_url.decode(1.0).expect("decode");
    assert_eq!(digest(image.pixels()), digest(page.render_viewport().pixels()));
    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_block_capture_stays_in_block_mode() {
    let page = fixture(CARD_PAGE, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let snapshots = FixtureSnapshotSource::new(page.as_ref().clone()).failing_on(0);
    let mut h = start(page.clone(), snapshots);

    h.pipeline.activate(CaptureMode::Block).expect("activate");
    h.pipeline.pointer_move(60.0, 80.0).expect("move");
    h.pipeline.click().expect("click");
    let (result, events) = h.pipeline.wait_for_capture(WAIT).await.expect("first attempt");
    assert_eq!(result, Err("Failed to capture screenshot".to_string()));
    assert!(!events.contains(&ObserverEvent::Deactivated));

    // retry on the same block succeeds
    h.pipeline.click().expect("click again");
    let (result, _) = h.pipeline.wait_for_capture(WAIT).await.expect("second attempt");
    assert_eq!(result, Ok(()));
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switching_modes_deactivates_first() {
    let page = fixture(CARD_PAGE, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::Block).expect("block");
    h.pipeline.activate(CaptureMode::Block).expect("same mode");
    h.pipeline.activate(CaptureMode::Region).expect("region");
    h.pipeline.deactivate().expect("off");

    let mut lifecycle = Vec::new();
    while lifecycle.len() < 4 {
        match h.pipeline.next_event().await.expect("event") {
            e @ (ObserverEvent::Activated(_) | ObserverEvent::Deactivated) => lifecycle.push(e),
            _ => {}
        }
    }
    assert_eq!(
        lifecycle,
        vec![
            ObserverEvent::Activated(CaptureMode::Block),
            ObserverEvent::Deactivated,
            ObserverEvent::Activated(CaptureMode::Region),
            ObserverEvent::Deactivated,
        ]
    );
    h.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switching_modes_mid_capture_runs_the_new_capture() {
    let tall = r#"<html><body><div style="left:0;top:0;width:400px;height:6000px;background:#eee"></div></body></html>"#;
    let page = fixture(tall, Viewport { width: 400.0, height: 300.0 }, 1.0);
    let mut h = start(page.clone(), FixtureSnapshotSource::new(page.as_ref().clone()));

    h.pipeline.activate(CaptureMode::FullPage).expect("full page");
    loop {
        match h.pipeline.next_event().await.expect("event") {
            ObserverEvent::Progress(p) if p.status == SessionState::Capturing => break,
            _ => {}
        }
    }
    h.pipeline.activate(CaptureMode::Visible).expect("visible");

    let (first, _) = h.pipeline.wait_for_capture(WAIT).await.expect("full page finished");
    assert_eq!(first, Err("Capture cancelled".to_string()));
    let (second, _) = h.pipeline.wait_for_capture(WAIT).await.expect("visible finished");
    assert_eq!(second, Ok(()));
    // the visible capture owns the activation, so its success ends it
    assert_eq!(h.pipeline.next_event().await, Some(ObserverEvent::Deactivated));

    let record = h.handoff.take(Duration::from_secs(60)).expect("handoff").expect("record");
    assert_eq!(record.metadata.label, "Visible Page");
    assert_eq!(h.page.scroll_y(), 0.0);
    assert!(!h.pipeline.session_active());
    h.pipeline.shutdown().await;
}
