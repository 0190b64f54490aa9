//! Page window computation for pagination chrome.
//!
//! Produces the sequence of page buttons a renderer should draw, collapsing
//! long runs of pages into a single ellipsis marker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One slot in the rendered page list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "page", rename_all = "snake_case")]
pub enum PageItem {
    /// A clickable page number (1-based)
    Page(usize),
    /// An elided run of page numbers
    Ellipsis,
}

impl PageItem {
    /// The page number, if this slot is not an ellipsis
    pub fn page(&self) -> Option<usize> {
        match self {
            PageItem::Page(page) => Some(*page),
            PageItem::Ellipsis => None,
        }
    }

    pub fn is_ellipsis(&self) -> bool {
        matches!(self, PageItem::Ellipsis)
    }
}

impl fmt::Display for PageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageItem::Page(page) => write!(f, "{}", page),
            PageItem::Ellipsis => f.write_str("..."),
        }
    }
}

/// Compute the visible page sequence.
///
/// `total` is the number of pages and is treated as at least 1. When it fits
/// in `max_visible` every page is listed. Otherwise the first page, the last
/// page and every page within `max_visible / 2` of `current` are kept; a
/// single missing page between kept pages is listed explicitly and longer
/// gaps collapse into one [`PageItem::Ellipsis`].
///
/// `current` is not clamped here; callers pass an in-range page.
pub fn visible_pages(current: usize, total: usize, max_visible: usize) -> Vec<PageItem> {
    let total = total.max(1);

    if total <= max_visible {
        return (1..=total).map(PageItem::Page).collect();
    }

    let delta = max_visible / 2;
    let low = current.saturating_sub(delta).max(1);
    let high = current.saturating_add(delta).min(total);

    let mut kept = BTreeSet::new();
    kept.insert(1);
    kept.insert(total);
    if low <= high {
        kept.extend(low..=high);
    }

    let mut items = Vec::with_capacity(kept.len() + 2);
    let mut last: Option<usize> = None;

    for page in kept {
        if let Some(previous) = last {
            match page - previous {
                1 => {}
                2 => items.push(PageItem::Page(previous + 1)),
                _ => items.push(PageItem::Ellipsis),
            }
        }
        items.push(PageItem::Page(page));
        last = Some(page);
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use PageItem::{Ellipsis, Page};

    fn numbers(items: &[PageItem]) -> Vec<usize> {
        items.iter().filter_map(PageItem::page).collect()
    }

    #[test]
    fn test_small_totals_are_listed_verbatim() {
        for max_visible in 1..12 {
            for total in 1..=max_visible {
                let pages = visible_pages(1, total, max_visible);
                let expected: Vec<_> = (1..=total).map(Page).collect();
                assert_eq!(pages, expected, "total={} max={}", total, max_visible);
            }
        }
    }

    #[test]
    fn test_zero_total_yields_single_page() {
        assert_eq!(visible_pages(1, 0, 10), vec![Page(1)]);
        assert_eq!(visible_pages(1, 0, 0), vec![Page(1)]);
    }

    #[test]
    fn test_collapses_both_sides() {
        let pages = visible_pages(10, 20, 4);
        assert_eq!(
            pages,
            vec![Page(1), Ellipsis, Page(8), Page(9), Page(10), Page(11), Page(12), Ellipsis, Page(20)]
        );
    }

    #[test]
    fn test_single_gap_is_filled() {
        // Kept pages are 1, 3..=7 and 20: page 2 is the only missing page on the left.
        let pages = visible_pages(5, 20, 4);
        assert_eq!(
            pages,
            vec![Page(1), Page(2), Page(3), Page(4), Page(5), Page(6), Page(7), Ellipsis, Page(20)]
        );
    }

    #[test]
    fn test_window_at_edges() {
        assert_eq!(
            visible_pages(1, 30, 6),
            vec![Page(1), Page(2), Page(3), Page(4), Ellipsis, Page(30)]
        );
        assert_eq!(
            visible_pages(30, 30, 6),
            vec![Page(1), Ellipsis, Page(27), Page(28), Page(29), Page(30)]
        );
    }

    #[test]
    fn test_properties_hold_for_large_totals() {
        for max_visible in 0..9 {
            for total in (max_visible + 1)..40 {
                for current in 1..=total {
                    let pages = visible_pages(current, total, max_visible);
                    let nums = numbers(&pages);

                    assert_eq!(nums.first(), Some(&1));
                    assert_eq!(nums.last(), Some(&total));
                    assert!(nums.windows(2).all(|w| w[0] < w[1]));
                    assert!(nums.iter().all(|&p| (1..=total).contains(&p)));
                    assert!(nums.contains(&current));
                    assert!(!pages.windows(2).any(|w| w[0].is_ellipsis() && w[1].is_ellipsis()));
                    assert!(!pages.first().map_or(false, PageItem::is_ellipsis));
                    assert!(!pages.last().map_or(false, PageItem::is_ellipsis));
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(visible_pages(7, 50, 10), visible_pages(7, 50, 10));
    }

    #[test]
    fn test_display() {
        let rendered: Vec<String> = visible_pages(1, 10, 2).iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1", "2", "...", "10"]);
    }
}
