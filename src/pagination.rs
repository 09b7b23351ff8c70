//! Pagination engine.
//!
//! Deterministic windowing of compose and tag listings. `page` and
//! `per_page` are 1-indexed; a page past the end yields an empty window,
//! not an error. Totals are exact at query time but not transactionally
//! snapshotted: two calls may observe different totals.

use serde::{Deserialize, Serialize};

/// Page size applied when the request does not name one.
pub const DEFAULT_PER_PAGE: usize = 10;

/// Upper bound on the page size; larger requests are clamped.
pub const MAX_PER_PAGE: usize = 100;

/// Normalized pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed page number.
    pub page: usize,
    /// Window size, clamped to [`MAX_PER_PAGE`].
    pub per_page: usize,
}

impl PageRequest {
    /// Normalize raw request parameters. `page` below 1 becomes 1 and
    /// `per_page` of 0 falls back to the default.
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: match per_page {
                0 => DEFAULT_PER_PAGE,
                n => n.min(MAX_PER_PAGE),
            },
        }
    }

    /// Normalize optional request parameters.
    pub fn from_params(page: Option<usize>, per_page: Option<usize>) -> Self {
        Self::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PER_PAGE))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

/// Builds the pre-computed page link query strings.
///
/// Non-pagination query arguments are preserved in the links so a client
/// can follow `next` without re-assembling its filter.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    path: String,
    args: Vec<(String, String)>,
}

impl LinkBuilder {
    /// Links rooted at `path`, e.g. `/api/1/composes/`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// Preserve one non-pagination query argument in every link.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    fn url(&self, page: usize, per_page: usize) -> String {
        let mut out = format!("{}?", self.path);
        for (key, value) in &self.args {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('&');
        }
        out.push_str(&format!("page={page}&per_page={per_page}"));
        out
    }
}

/// Metadata about one paginated window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// 1-indexed page number of this window.
    pub page: usize,
    /// Total page count, `ceil(total / per_page)`.
    pub pages: usize,
    /// Window size used.
    pub per_page: usize,
    /// Exact item count at query time.
    pub total: usize,
    /// Link to the first page.
    pub first: String,
    /// Link to the last page.
    pub last: String,
    /// Link to the next page; null on the last page.
    pub next: Option<String>,
    /// Link to the previous page; null on the first page.
    pub prev: Option<String>,
}

/// One paginated window with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in this window.
    pub items: Vec<T>,
    /// Window metadata.
    pub meta: PageMeta,
}

/// Window `items` according to `request`, building link strings with
/// `links`. An out-of-range page yields empty `items` with full metadata.
pub fn paginate<T>(items: Vec<T>, request: PageRequest, links: &LinkBuilder) -> Page<T> {
    let PageRequest { page, per_page } = request;
    let total = items.len();
    let pages = total.div_ceil(per_page);

    let window: Vec<T> = items
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    let meta = PageMeta {
        page,
        pages,
        per_page,
        total,
        first: links.url(1, per_page),
        last: links.url(pages.max(1), per_page),
        next: (page < pages).then(|| links.url(page + 1, per_page)),
        prev: (page > 1).then(|| links.url(page - 1, per_page)),
    };

    Page {
        items: window,
        meta,
    }
}
