//! Fixture rendering and tile arithmetic, composed without the bus

use blocksnap::capture::TilePlan;
use blocksnap::fixture::{FixtureOptions, FixturePage};
use blocksnap::helper::{MemoryClipboard, RenderHelper};
use blocksnap::observer::PageHost;
use blocksnap::raster::compositor;
use blocksnap::{Rect, Viewport};

const PAGE: &str = r#"<html><body>
  <header style="left:0;top:0;width:320px;height:90px;background:#114"></header>
  <div style="left:10px;top:70px;width:200px;height:500px;background:rgba(255,128,0,0.4)"></div>
  <footer style="left:0;top:1130px;width:320px;height:70px;background:#441"></footer>
</body></html>"#;

fn page(dpr: f64) -> FixturePage {
    let options = FixtureOptions {
        viewport: Viewport { width: 320.0, height: 300.0 },
        device_pixel_ratio: dpr,
        ..Default::default()
    };
    FixturePage::parse_with(PAGE, options).expect("fixture")
}

#[tokio::test]
async fn tiles_from_the_plan_stitch_back_into_the_page() {
    for dpr in [1.0, 1.25, 1.5, 1.75, 2.0] {
        let page = page(dpr);
        let plan = TilePlan::new(&page.metrics(), 50.0).expect("plan");
        assert_eq!(plan.count, 5);

        let mut tiles = Vec::new();
        for y in plan.positions() {
            page.scroll_to(y);
            tiles.push(page.render_viewport().to_data_url().expect("png"));
        }
        let helper = RenderHelper::new(MemoryClipboard::new());
        let stitched = helper
            .stitch(tiles, plan.viewport_height, plan.scroll_height, dpr, 50.0)
            .await
            .expect("stitch")
            .decode(dpr)
            .expect("decode");
        assert_eq!(stitched, page.render_page(), "dpr {}", dpr);
    }
}

#[test]
fn viewport_render_is_a_crop_of_the_page() {
    let page = page(2.0);
    page.scroll_to(333.0);
    let full = page.render_page();
    let window = compositor::crop(&full, Rect::new(0.0, 333.0, 320.0, 300.0), 2.0).expect("crop");
    assert_eq!(window, page.render_viewport());
}

#[test]
fn metrics_track_scroll_and_height() {
    let page = page(1.0);
    let m = page.metrics();
    assert_eq!((m.viewport_height, m.scroll_height, m.scroll_y), (300.0, 1200.0, 0.0));
    assert_eq!(page.scroll_to(-5.0), 0.0);
    assert_eq!(page.scroll_to(10_000.0), 900.0);
    assert_eq!(page.metrics().scroll_y, 900.0);
}
