//! Keyset pagination over an ordered key space.
//!
//! A [`KeysetSelector`] names a page as "at most `size` entries whose key is
//! strictly greater than `last_key`". The selector holds no storage code:
//! stores read it, clamp the size through [`Limit::bound`], and apply the
//! exclusive lower bound to their own total order.

use std::collections::HashMap;

use crate::error::ServiceError;

/// Largest page any store will return, whatever the caller asks for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Query parameter carrying the exclusive lower bound.
pub const LAST_KEY_PARAM: &str = "lastKey";

/// Query parameter carrying the requested page size.
pub const SIZE_PARAM: &str = "size";

/// A cursor-bounded page request.
///
/// `last_key == K::default()` means "from the beginning".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeysetSelector<K> {
    /// Exclusive lower bound of the page.
    pub last_key: K,
    /// Requested page size. Zero or negative means "as many as allowed".
    pub size: i64,
}

impl<K: Default + PartialEq> KeysetSelector<K> {
    #[must_use]
    pub fn new(last_key: K, size: i64) -> Self {
        Self { last_key, size }
    }

    /// Returns `true` when the page starts at the beginning of the key space.
    #[must_use]
    pub fn is_from_start(&self) -> bool {
        self.last_key == K::default()
    }

    /// The page size a store must apply.
    #[must_use]
    pub fn limit(&self) -> u32 {
        Limit::new(self.size).bound(MAX_PAGE_SIZE)
    }

    /// Selector for the page following one whose greatest key was `last_key`.
    #[must_use]
    pub fn next(&self, last_key: K) -> Self {
        Self {
            last_key,
            size: self.size,
        }
    }
}

/// A requested page size, before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(i64);

impl Limit {
    #[must_use]
    pub fn new(requested: i64) -> Self {
        Self(requested)
    }

    /// `min(requested, max)` for a positive request, `max` otherwise.
    #[must_use]
    pub fn bound(self, max: u32) -> u32 {
        if self.0 > 0 {
            u32::try_from(self.0).map_or(max, |requested| requested.min(max))
        } else {
            max
        }
    }
}

/// Decoded `key=value` pairs of a resource query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: HashMap<String, String>,
}

impl QueryParams {
    /// Parses an `application/x-www-form-urlencoded` query string.
    /// Later duplicates of a key win.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let values = url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .into_owned()
            .collect();
        Self { values }
    }

    /// Returns the value for `key`, treating an empty value as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Operation name attached to errors raised while parsing a query string.
pub const QUERY_OPERATION: &str = "query";

/// Builds a selector from `lastKey` and `size` query parameters.
///
/// A missing `lastKey` means "from the beginning" and a missing `size` means
/// "as many as allowed".
///
/// # Errors
///
/// Returns an `Invalid` error when `size` is not an integer or when
/// `parse_key` rejects `lastKey`.
pub fn parse_keyset_selector<K, F, E>(
    query: &QueryParams,
    parse_key: F,
) -> Result<KeysetSelector<K>, ServiceError>
where
    K: Default,
    F: FnOnce(&str) -> Result<K, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let last_key = match query.get(LAST_KEY_PARAM) {
        Some(raw) => parse_key(raw).map_err(|e| {
            ServiceError::invalid(format!("Invalid '{LAST_KEY_PARAM}' query parameter"))
                .with_operation(QUERY_OPERATION)
                .with_source(e)
        })?,
        None => K::default(),
    };

    let size = match query.get(SIZE_PARAM) {
        Some(raw) => raw.parse::<i64>().map_err(|e| {
            ServiceError::invalid(format!("Invalid '{SIZE_PARAM}' query parameter"))
                .with_operation(QUERY_OPERATION)
                .with_source(e)
        })?,
        None => 0,
    };

    Ok(KeysetSelector { last_key, size })
}
