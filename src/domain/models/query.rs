//! Store-agnostic query description and pagination types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::ComparisonOp;
use super::model::Relation;

/// A single predicate against one attribute. All predicates of a query are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Predicate {
    /// `column <op> value`.
    Compare {
        column: String,
        op: ComparisonOp,
        value: Value,
    },
    /// Inclusive range.
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    /// Membership. Empty matches nothing.
    In {
        column: String,
        values: Vec<Value>,
    },
    /// Negated membership. Empty matches everything.
    NotIn {
        column: String,
        values: Vec<Value>,
    },
    /// `column IS NULL`.
    Null {
        column: String,
    },
    /// `column IS NOT NULL`.
    NotNull {
        column: String,
    },
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// SQL keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Attribute to sort by.
    pub column: String,
    /// Sort direction.
    pub direction: Direction,
}

impl OrderBy {
    /// Ascending on `column`.
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Asc,
        }
    }

    /// Descending on `column`.
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Desc,
        }
    }
}

/// Fluent query builder handed to a [`RecordStore`](crate::domain::ports::RecordStore).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    /// ANDed predicates.
    pub predicates: Vec<Predicate>,
    /// Sort keys, most significant first.
    pub order: Vec<OrderBy>,
    /// Relations attached under their names.
    pub with: Vec<Relation>,
    /// Relations counted into `<name>_count`.
    pub with_count: Vec<Relation>,
}

impl Query {
    /// Query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comparison.
    #[must_use]
    pub fn where_op(mut self, column: &str, op: ComparisonOp, value: Value) -> Self {
        self.predicates.push(Predicate::Compare {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    /// Add an equality, or `IS NULL` for a JSON `null`.
    #[must_use]
    pub fn where_eq(self, column: &str, value: Value) -> Self {
        self.where_op(column, ComparisonOp::Eq, value)
    }

    /// Add an inclusive range.
    #[must_use]
    pub fn where_between(mut self, column: &str, low: Value, high: Value) -> Self {
        self.predicates.push(Predicate::Between {
            column: column.to_string(),
            low,
            high,
        });
        self
    }

    /// Add a membership test.
    #[must_use]
    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.predicates.push(Predicate::In {
            column: column.to_string(),
            values,
        });
        self
    }

    /// Add a negated membership test.
    #[must_use]
    pub fn where_not_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.predicates.push(Predicate::NotIn {
            column: column.to_string(),
            values,
        });
        self
    }

    /// Add `IS NULL`.
    #[must_use]
    pub fn where_null(mut self, column: &str) -> Self {
        self.predicates.push(Predicate::Null {
            column: column.to_string(),
        });
        self
    }

    /// Add `IS NOT NULL`.
    #[must_use]
    pub fn where_not_null(mut self, column: &str) -> Self {
        self.predicates.push(Predicate::NotNull {
            column: column.to_string(),
        });
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Eager-load `relations`.
    #[must_use]
    pub fn with(mut self, relations: Vec<Relation>) -> Self {
        self.with.extend(relations);
        self
    }

    /// Count `relations`.
    #[must_use]
    pub fn with_count(mut self, relations: Vec<Relation>) -> Self {
        self.with_count.extend(relations);
        self
    }
}

/// Which page of a result set to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Items per page.
    pub per_page: u64,
    /// 1-based page number. 0 is read as 1.
    pub page: u64,
}

impl PageRequest {
    /// Page size used when none is given.
    pub const DEFAULT_PER_PAGE: u64 = 15;

    /// First page of `per_page` items.
    pub const fn new(per_page: u64) -> Self {
        Self { per_page, page: 1 }
    }

    /// Select page `page`.
    #[must_use]
    pub const fn page(mut self, page: u64) -> Self {
        self.page = if page == 0 { 1 } else { page };
        self
    }

    /// Rows skipped before this page.
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1)).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PER_PAGE)
    }
}

/// One window of a larger result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Matching rows across all pages.
    pub total: u64,
    /// Page size.
    pub per_page: u64,
    /// 1-based page number.
    pub current_page: u64,
    /// Last page number. At least 1.
    pub last_page: u64,
}

impl<T> Page<T> {
    /// Page of `items` out of `total` matches.
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let last_page = if request.per_page == 0 {
            1
        } else {
            total.div_ceil(request.per_page).max(1)
        };
        Self {
            items,
            total,
            per_page: request.per_page,
            current_page: request.page,
            last_page,
        }
    }

    /// Convert every item, keeping the pagination metadata.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
        })
    }

    /// True when a later page exists.
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}
