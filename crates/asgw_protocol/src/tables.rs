//! Client-value conversion tables.
//!
//! Filter and truncation preferences arrive as small enumeration
//! values; these tables convert them to seconds and byte counts.

use serde::{Deserialize, Serialize};

/// A resolved `FilterType` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterWindow {
    /// No filter; synchronize all items.
    All,
    /// Only items newer than this many seconds.
    Seconds(u32),
    /// Only incomplete tasks.
    IncompleteOnly,
}

impl Default for FilterWindow {
    fn default() -> Self {
        FilterWindow::All
    }
}

/// Converts a `FilterType` value (0–8) to a window.
///
/// Values of 9 or above are undefined by the protocol and yield
/// `None`; the caller reports them as a status error.
pub fn filter_window(value: u8) -> Option<FilterWindow> {
    const DAY: u32 = 60 * 60 * 24;
    Some(match value {
        0 => FilterWindow::All,
        1 => FilterWindow::Seconds(DAY),
        2 => FilterWindow::Seconds(DAY * 3),
        3 => FilterWindow::Seconds(DAY * 7),
        4 => FilterWindow::Seconds(DAY * 14),
        // months count as 30.5 days
        5 => FilterWindow::Seconds(2_635_200),
        6 => FilterWindow::Seconds(7_905_600),
        7 => FilterWindow::Seconds(15_811_200),
        8 => FilterWindow::IncompleteOnly,
        _ => return None,
    })
}

/// Converts a `MIMETruncation` value (0–8) to a byte limit.
///
/// `None` inside the `Some` means "do not truncate".
pub fn mime_truncation(value: u8) -> Option<Option<u32>> {
    Some(match value {
        0 => Some(0),
        1 => Some(4_096),
        2 => Some(5_120),
        3 => Some(7_168),
        4 => Some(10_240),
        5 => Some(20_480),
        6 => Some(51_200),
        7 => Some(102_400),
        8 => None,
        _ => return None,
    })
}

/// Converts a body `Truncation` value (0–9) to a byte limit.
pub fn body_truncation(value: u8) -> Option<Option<u32>> {
    Some(match value {
        0 => Some(0),
        1 => Some(512),
        2 => Some(1_024),
        3 => Some(2_048),
        4 => Some(5_120),
        5 => Some(10_240),
        6 => Some(20_480),
        7 => Some(51_200),
        8 => Some(102_400),
        9 => None,
        _ => return None,
    })
}
