//! List-query normalization.
//!
//! Client-supplied paging and sorting is free-form, so everything here is
//! lenient: malformed values fall back to defaults instead of failing the
//! request. The one thing that is never lenient is status scoping, see
//! [`scope_statuses`].

use crate::caller::Caller;
use crate::status::ModerationStatus;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A validated page request (page >= 1, 1 <= page_size <= MAX_PAGE_SIZE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Parse raw query values. Missing, malformed or non-positive values use
    /// the defaults; oversized page sizes are capped.
    pub fn parse(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(u32::MAX as i64) as u32)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(MAX_PAGE_SIZE as i64) as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }
}

/// Pagination metadata returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl PageInfo {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Self {
            page: request.page,
            page_size: request.page_size,
            total,
            total_pages: total.div_ceil(request.page_size as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// A column a list may be sorted by. Implementors form the allow-list.
pub trait SortField: Copy + Default {
    fn parse(name: &str) -> Option<Self>;
    fn column(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreSortField {
    #[default]
    CreatedAt,
    AverageRating,
    TotalReviews,
}

impl SortField for StoreSortField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" => Some(Self::CreatedAt),
            "average_rating" | "rating" => Some(Self::AverageRating),
            "total_reviews" => Some(Self::TotalReviews),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::AverageRating => "average_rating",
            Self::TotalReviews => "total_reviews",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewSortField {
    #[default]
    CreatedAt,
    Rating,
}

impl SortField for ReviewSortField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" => Some(Self::CreatedAt),
            "rating" => Some(Self::Rating),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Rating => "rating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort<F: SortField> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F: SortField> Sort<F> {
    /// Parse `sort` (`field` or `-field`) and an optional `order`.
    ///
    /// An unknown field resets to the default `created_at desc`, whatever
    /// the order says. A valid `order` overrides the `-` prefix.
    pub fn parse(sort: Option<&str>, order: Option<&str>) -> Self {
        let Some(raw) = sort.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self {
                field: F::default(),
                direction: order.and_then(SortDirection::parse).unwrap_or_default(),
            };
        };

        let (name, prefixed_direction) = match raw.strip_prefix('-') {
            Some(name) => (name, SortDirection::Desc),
            None => (raw, SortDirection::Asc),
        };

        match F::parse(&name.to_ascii_lowercase()) {
            Some(field) => Self {
                field,
                direction: order
                    .and_then(SortDirection::parse)
                    .unwrap_or(prefixed_direction),
            },
            None => Self::default(),
        }
    }

    /// `ORDER BY` body. Column names come from the allow-list only.
    pub fn order_by(&self) -> String {
        format!(
            "{} {}, id {}",
            self.field.column(),
            self.direction.as_sql(),
            self.direction.as_sql()
        )
    }
}

/// Statuses a caller is allowed to see in a listing.
///
/// Anonymous callers and regular users always get `[Approved]`, no matter
/// what they asked for. Administrators get the requested status, or every
/// status when they did not ask for one. Never returns an empty list.
pub fn scope_statuses(
    caller: &Caller,
    requested: Option<ModerationStatus>,
) -> Vec<ModerationStatus> {
    if !caller.is_admin() {
        return vec![ModerationStatus::Approved];
    }
    match requested {
        Some(status) => vec![status],
        None => ModerationStatus::ALL.to_vec(),
    }
}

/// Trim a free-text search term; blank terms mean "no filter".
pub fn normalize_search(q: Option<&str>) -> Option<String> {
    q.map(str::trim).filter(|q| !q.is_empty()).map(str::to_string)
}
