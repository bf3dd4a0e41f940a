//! Page bookkeeping

use crate::schema::RowCount;
use serde::Serialize;

/// Page position and neighbours for one browse request
///
/// Built per request from the row estimate; never shared between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    /// Row estimate the cursor was computed from
    pub total: RowCount,

    pub page_size: u64,

    /// Page index the caller asked for
    pub requested_page: u64,

    /// Page index actually served
    pub page: u64,

    /// Last page index known to hold rows (0 for an empty result); only a
    /// lower bound when `total` is capped
    pub last_page: u64,

    pub has_next: bool,

    pub has_previous: bool,

    /// Whether the requested page lay past the end and was moved back
    pub clamped: bool,
}

impl PaginationCursor {
    /// # Arguments
    ///
    /// * `total` - Row estimate; a capped estimate makes `last_page` a lower bound
    /// * `page_size` - Rows per page (treated as at least one)
    /// * `requested_page` - Zero-based page index asked for
    ///
    /// Only an exact total can tell that a page lies past the end, so a
    /// capped total never clamps.
    pub fn new(total: RowCount, page_size: u64, requested_page: u64) -> Self {
        let page_size = page_size.max(1);
        let rows = total.value();
        let known_last_page = if rows == 0 { 0 } else { (rows - 1) / page_size };

        let (page, last_page, clamped) = if total.is_capped() {
            (requested_page, known_last_page.max(requested_page), false)
        } else {
            (
                requested_page.min(known_last_page),
                known_last_page,
                requested_page > known_last_page,
            )
        };

        // Rows may exist beyond a capped estimate
        let has_next = page < last_page || total.is_capped();

        Self {
            total,
            page_size,
            requested_page,
            page,
            last_page,
            has_next,
            has_previous: page > 0,
            clamped,
        }
    }

    /// Offset of the first row of the served page
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.page_size)
    }

    /// Whether the result is empty because the table (or filter) matches nothing
    pub fn is_empty(&self) -> bool {
        self.total.value() == 0
    }
}
