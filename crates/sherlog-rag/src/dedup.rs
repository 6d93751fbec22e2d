//! Exact-match deduplication by (message, timestamp)

use std::collections::HashSet;

use sherlog_core::Identified;

/// Keep the first occurrence of every identity, preserving order.
pub fn deduplicate<T, I>(items: I) -> Vec<T>
where
    T: Identified,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.identity()))
        .collect()
}
