//! Full-page tile arithmetic

use crate::capture::PageMetrics;
use crate::{Error, Result};

/// Where each tile of a full-page capture is taken.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub viewport_height: f64,
    pub scroll_height: f64,
    /// `viewport_height - overlap`
    pub effective: f64,
    pub count: usize,
}

impl TilePlan {
    /// `count = ceil(scroll_height / (viewport_height - overlap))`.
    pub fn new(metrics: &PageMetrics, overlap: f64) -> Result<Self> {
        let viewport_height = metrics.viewport_height;
        // the page can never be shorter than its own viewport
        let scroll_height = metrics.scroll_height.max(viewport_height);
        let effective = viewport_height - overlap;
        if !(effective > 0.0) || !scroll_height.is_finite() {
            return Err(Error::InvalidPageMetrics(format!(
                "viewport height {} with overlap {}",
                viewport_height, overlap
            )));
        }
        let count = ((scroll_height / effective).ceil() as usize).max(1);
        Ok(Self { viewport_height, scroll_height, effective, count })
    }

    /// Scroll offset of tile `index`, clamped so the last viewport ends at
    /// the page bottom.
    pub fn scroll_position(&self, index: usize) -> f64 {
        (index as f64 * self.effective).min(self.scroll_height - self.viewport_height)
    }

    pub fn positions(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.count).map(move |i| self.scroll_position(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(viewport_height: f64, scroll_height: f64) -> PageMetrics {
        PageMetrics {
            viewport_width: 800.0,
            viewport_height,
            scroll_height,
            scroll_y: 0.0,
            device_pixel_ratio: 1.0,
        }
    }

    #[test]
    fn three_thousand_px_page() {
        let plan = TilePlan::new(&metrics(1000.0, 3000.0), 50.0).expect("plan");
        assert_eq!(plan.count, 4);
        let positions: Vec<f64> = plan.positions().collect();
        assert_eq!(positions, vec![0.0, 950.0, 1900.0, 2000.0]);
    }

    #[test]
    fn short_page_is_padded_to_viewport() {
        let plan = TilePlan::new(&metrics(1000.0, 400.0), 50.0).expect("plan");
        assert_eq!(plan.count, 2);
        assert!(plan.positions().all(|y| y == 0.0));
    }

    #[test]
    fn overlap_must_be_smaller_than_viewport() {
        assert!(matches!(TilePlan::new(&metrics(50.0, 3000.0), 50.0), Err(Error::InvalidPageMetrics(_))));
    }
}
