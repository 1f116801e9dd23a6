/// Virtualization Window Calculator
///
/// Computes which rows and columns need to be materialized for the current
/// scroll position, plus the two timers around it: resize coalescing and the
/// "is scrolling" flag. Time is always passed in, so both behave
/// deterministically under test.
///
/// Out-of-range requests are expected during resizes and page transitions
/// and are clamped without any diagnostics.

use crate::dimensions::{Dimensions, Size};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{Duration, Instant};

pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(60);
pub const SCROLL_END_TIMEOUT: Duration = Duration::from_millis(150);
pub const DEFAULT_COLUMN_BUFFER: usize = 3;

/// Fast mode applies resizes synchronously (tests, headless rendering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Normal,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub top: f64,
    pub left: f64,
}

impl ScrollPosition {
    pub fn new(top: f64, left: f64) -> Self {
        ScrollPosition { top, left }
    }
}

/// Rows and columns to render. Row indices are positions in the full list of
/// visible rows; both ends are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderWindow {
    pub first_row_index: usize,
    pub last_row_index: usize,
    pub first_column_index: usize,
    pub last_column_index: usize,
    pub page: usize,
}

impl RenderWindow {
    pub fn rows(&self) -> Range<usize> {
        self.first_row_index..self.last_row_index
    }

    pub fn columns(&self) -> Range<usize> {
        self.first_column_index..self.last_column_index
    }
}

/// Row window for the page `[page_start, page_start + page_row_count)`.
pub fn compute_row_window(
    dimensions: &Dimensions,
    scroll_top: f64,
    page_start: usize,
    page_row_count: usize,
) -> Range<usize> {
    let page_end = page_start + page_row_count;
    let viewport_page_size = dimensions.viewport_page_size();
    let page_height = viewport_page_size as f64 * dimensions.row_height;
    let scroll_top = scroll_top.clamp(0.0, dimensions.max_scroll_top());

    let virtual_page = if page_height > 0.0 {
        (scroll_top / page_height).floor() as usize
    } else {
        0
    };
    let rendering_zone = 2 * viewport_page_size;

    let first = (virtual_page * viewport_page_size + page_start).min(page_end);
    let last = (first + rendering_zone).min(page_end);
    first..last
}

/// Column window from the cumulative left offsets of the columns.
pub fn compute_column_window(
    positions: &[f64],
    total_width: f64,
    scroll_left: f64,
    viewport_width: f64,
    buffer: usize,
) -> Range<usize> {
    if positions.is_empty() {
        return 0..0;
    }
    let max_left = (total_width - viewport_width).max(0.0);
    let left = scroll_left.clamp(0.0, max_left);
    let right = left + viewport_width;

    // Last column starting at or before the left edge
    let first = positions.partition_point(|p| *p <= left).saturating_sub(1);
    // Columns starting before the right edge
    let last = positions.partition_point(|p| *p < right).max(first + 1);

    first.saturating_sub(buffer)..(last + buffer).min(positions.len())
}

/// Full render window.
pub fn compute_render_window(
    dimensions: &Dimensions,
    scroll: &ScrollPosition,
    page: usize,
    page_start: usize,
    page_row_count: usize,
    column_positions: &[f64],
    column_buffer: usize,
) -> RenderWindow {
    let rows = compute_row_window(dimensions, scroll.top, page_start, page_row_count);
    let columns = compute_column_window(
        column_positions,
        dimensions.content_size.width,
        scroll.left,
        dimensions.viewport_inner_size.width,
        column_buffer,
    );
    RenderWindow {
        first_row_index: rows.start,
        last_row_index: rows.end,
        first_column_index: columns.start,
        last_column_index: columns.end,
        page,
    }
}

/// Trailing-edge debounce for viewport resizes.
#[derive(Debug, Clone)]
pub struct ResizeCoalescer {
    delay: Duration,
    mode: ExecutionMode,
    pending: Option<(Size, Instant)>,
}

impl ResizeCoalescer {
    pub fn new(mode: ExecutionMode) -> Self {
        ResizeCoalescer {
            delay: RESIZE_DEBOUNCE,
            mode,
            pending: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Records a resize. Returns the size to apply right away in fast mode.
    pub fn push(&mut self, size: Size, now: Instant) -> Option<Size> {
        match self.mode {
            ExecutionMode::Fast => {
                self.pending = None;
                Some(size)
            }
            ExecutionMode::Normal => {
                self.pending = Some((size, now + self.delay));
                None
            }
        }
    }

    /// Returns the last pushed size once the debounce delay has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Size> {
        match self.pending {
            Some((size, deadline)) if now >= deadline => {
                self.pending = None;
                Some(size)
            }
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Tracks the transient "is scrolling" flag.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    timeout: Duration,
    scrolling_until: Option<Instant>,
}

impl Default for ScrollTracker {
    fn default() -> Self {
        ScrollTracker {
            timeout: SCROLL_END_TIMEOUT,
            scrolling_until: None,
        }
    }
}

impl ScrollTracker {
    pub fn on_scroll(&mut self, now: Instant) {
        self.scrolling_until = Some(now + self.timeout);
    }

    /// Clears the flag once the timeout passed. Returns true if it was cleared.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.scrolling_until {
            Some(deadline) if now >= deadline => {
                self.scrolling_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_scrolling(&self) -> bool {
        self.scrolling_until.is_some()
    }
}
