use crate::value::{Record, Value};
use serde::{Deserialize, Serialize};

/// Offset pagination parameters. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pageable {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl Pageable {
    pub fn new(page: u64, size: u64) -> Self {
        Self { page, size }.clamped()
    }

    /// Page and size raised to at least 1.
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            size: self.size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        let p = self.clamped();
        (p.page - 1).saturating_mul(p.size)
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, pageable: &Pageable, total: u64) -> Self {
        let pageable = pageable.clamped();
        let total_pages = total.div_ceil(pageable.size).max(1);
        Self {
            data,
            total,
            page: pageable.page,
            size: pageable.size,
            total_pages,
            has_next: pageable.page < total_pages,
            has_prev: pageable.page > 1,
        }
    }
}

/// Keyset pagination parameters.
#[derive(Debug, Clone, Default)]
pub struct CursorPageOptions {
    pub size: u64,
    /// Ordering column; defaults to the primary column.
    pub order_by: Option<String>,
    /// Last ordering value seen; `None` starts from the beginning.
    pub cursor: Option<Value>,
    pub filter: Option<Record>,
}

impl CursorPageOptions {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn after(mut self, cursor: impl Into<Value>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn filter(mut self, filter: Record) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<Value>,
    pub has_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_metadata() {
        let page = Page::new(vec![1, 2], &Pageable::new(2, 2), 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
    }

    #[test]
    fn test_last_page_has_no_next() {
        let page = Page::new(vec![5], &Pageable::new(3, 2), 5);
        assert!(!page.has_next);
        assert!(page.has_prev);
    }

    #[test]
    fn test_empty_result_has_one_page() {
        let page: Page<i32> = Page::new(Vec::new(), &Pageable::default(), 0);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next);
        assert!(!page.has_prev);
    }

    #[test]
    fn test_clamping() {
        let pageable = Pageable { page: 0, size: 0 };
        assert_eq!(pageable.clamped(), Pageable { page: 1, size: 1 });
        assert_eq!(pageable.offset(), 0);
        assert_eq!(Pageable::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_offset_saturates_on_huge_page() {
        assert_eq!(Pageable::new(u64::MAX, 20).offset(), u64::MAX);
        assert_eq!(Pageable::new(2, u64::MAX).offset(), u64::MAX);
        let page: Page<i32> = Page::new(Vec::new(), &Pageable::new(u64::MAX, u64::MAX), 3);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next);
    }
}
