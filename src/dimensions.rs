/// Grid dimensions
///
/// Derives the viewport sizes and scrollbar reservation from the root size,
/// the content size and the scrollbar thickness. Reserving one scrollbar can
/// make the other axis overflow, so overflow is decided in two passes.

use serde::{Deserialize, Serialize};

pub const DEFAULT_ROW_HEIGHT: f64 = 52.0;
pub const DEFAULT_HEADER_HEIGHT: f64 = 56.0;
pub const DEFAULT_SCROLLBAR_SIZE: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Size {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }
}

/// Inputs of the dimension computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionsInput {
    pub root_size: Size,
    pub header_height: f64,
    pub row_height: f64,
    /// Rows laid out in the scroll area (the current page)
    pub row_count: usize,
    /// Sum of the column widths
    pub columns_width: f64,
    pub scrollbar_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub root_size: Size,
    /// Scroll area including any scrollbar
    pub viewport_outer_size: Size,
    /// Scroll area minus reserved scrollbars
    pub viewport_inner_size: Size,
    pub content_size: Size,
    pub has_scroll_x: bool,
    pub has_scroll_y: bool,
    pub scrollbar_size: f64,
    pub row_height: f64,
    pub header_height: f64,
}

impl Dimensions {
    /// Largest valid vertical scroll offset
    pub fn max_scroll_top(&self) -> f64 {
        (self.content_size.height - self.viewport_inner_size.height).max(0.0)
    }

    /// Largest valid horizontal scroll offset
    pub fn max_scroll_left(&self) -> f64 {
        (self.content_size.width - self.viewport_inner_size.width).max(0.0)
    }

    /// Rows that fit in the inner viewport, at least 1
    pub fn viewport_page_size(&self) -> usize {
        if self.row_height <= 0.0 {
            return 1;
        }
        ((self.viewport_inner_size.height / self.row_height).floor() as usize).max(1)
    }
}

pub fn compute_dimensions(input: &DimensionsInput) -> Dimensions {
    let outer = Size::new(input.root_size.width, input.root_size.height - input.header_height);
    let content = Size::new(input.columns_width, input.row_count as f64 * input.row_height);
    let scrollbar = input.scrollbar_size.max(0.0);

    let mut has_scroll_y = content.height > outer.height;
    let has_scroll_x = content.width + if has_scroll_y { scrollbar } else { 0.0 } > outer.width;
    if has_scroll_x {
        has_scroll_y = content.height + scrollbar > outer.height;
    }

    let inner = Size::new(
        outer.width - if has_scroll_y { scrollbar } else { 0.0 },
        outer.height - if has_scroll_x { scrollbar } else { 0.0 },
    );

    Dimensions {
        root_size: input.root_size,
        viewport_outer_size: outer,
        viewport_inner_size: inner,
        content_size: content,
        has_scroll_x,
        has_scroll_y,
        scrollbar_size: scrollbar,
        row_height: input.row_height,
        header_height: input.header_height,
    }
}
