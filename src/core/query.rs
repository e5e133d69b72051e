//! Filtering, sorting and offset pagination for list operations.
//!
//! Backends with a query language translate a [`ListQuery`] into it; the mock
//! backend evaluates it in memory with [`apply`].

use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
    /// Case-insensitive substring for strings, membership for arrays.
    Contains,
}

/// One filter on a (possibly nested, dot-separated) field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, op: Op, value: impl Into<Value>) -> Self {
        Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Eq, value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Gte, value)
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Lte, value)
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Contains, value)
    }

    /// Last path segment, e.g. `city` for `address.city`.
    pub fn leaf(&self) -> &str {
        self.field.rsplit('.').next().unwrap_or(&self.field)
    }

    pub fn matches(&self, row: &Value) -> bool {
        let Some(actual) = lookup(row, &self.field) else {
            return false;
        };
        match self.op {
            Op::Eq => compare(actual, &self.value) == Some(Ordering::Equal),
            Op::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Op::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Op::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                (Value::Array(items), needle) => items
                    .iter()
                    .any(|item| compare(item, needle) == Some(Ordering::Equal)),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// Offset-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Page number is 1-based.
    pub fn for_page(page_size: usize, page_number: usize) -> Self {
        let page_number = page_number.max(1);
        Self {
            limit: page_size,
            offset: (page_number - 1) * page_size,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

/// One page of results. `total` counts every match, before pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, limit: usize, offset: usize) -> Self {
        Self {
            items,
            total,
            limit,
            offset,
        }
    }

    pub fn empty(page: PageRequest) -> Self {
        Self::new(Vec::new(), 0, page.limit, page.offset)
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    pub fn map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Filters (AND-ed), an optional sort, and a page window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Condition>,
    pub sort: Option<SortKey>,
    pub page: PageRequest,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.page = PageRequest::new(limit, offset);
        self
    }

    /// Fills in the entity's default sort when none was requested.
    pub fn with_default_sort(mut self, key: SortKey) -> Self {
        if self.sort.is_none() {
            self.sort = Some(key);
        }
        self
    }
}

/// Resolves a dot-separated path inside a JSON object.
pub fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(row, |value, segment| value.get(segment))
        .filter(|v| !v.is_null())
}

/// Orders two JSON scalars of the same kind. Numbers compare numerically,
/// strings lexicographically, so RFC 3339 timestamps sort chronologically.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Evaluates `query` over `rows`. Rows missing the sort field go last in
/// either direction.
pub fn apply(rows: Vec<Value>, query: &ListQuery) -> Page<Value> {
    let mut matched: Vec<Value> = rows
        .into_iter()
        .filter(|row| query.filters.iter().all(|c| c.matches(row)))
        .collect();

    if let Some(key) = &query.sort {
        matched.sort_by(|a, b| {
            match (lookup(a, &key.field), lookup(b, &key.field)) {
                (Some(x), Some(y)) => {
                    let ord = compare(x, y).unwrap_or(Ordering::Equal);
                    if key.descending { ord.reverse() } else { ord }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }

    let total = matched.len();
    let PageRequest { limit, offset } = query.page;
    let items = matched.into_iter().skip(offset).take(limit).collect();
    Page::new(items, total, limit, offset)
}
