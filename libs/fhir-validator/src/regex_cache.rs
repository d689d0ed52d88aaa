//! Shared compiled-regex cache.
//!
//! Rule patterns repeat across requests; compilation is the expensive part.
//! Write-once per pattern behind a small critical section: the first writer
//! wins and later callers see the published value. Compilation failures are
//! cached too, so a bad pattern is diagnosed once, not per node.

use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct RegexCache {
    inner: Mutex<LruCache<String, Arc<Result<Regex, regex::Error>>>>,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RegexCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compiled regex for `pattern`, compiling at most once per pattern.
    pub fn get(&self, pattern: &str) -> Arc<Result<Regex, regex::Error>> {
        let mut cache = match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned cache only loses memoization, not correctness.
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(compiled) = cache.get(pattern) {
            return compiled.clone();
        }
        let compiled = Arc::new(Regex::new(pattern));
        cache.put(pattern.to_string(), compiled.clone());
        compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_writer_wins() {
        let cache = RegexCache::default();
        let a = cache.get(r"^\d+$");
        let b = cache.get(r"^\d+$");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.as_ref().as_ref().unwrap().is_match("123"));
    }

    #[test]
    fn test_invalid_pattern_is_cached() {
        let cache = RegexCache::default();
        let first = cache.get("([unclosed");
        assert!(first.as_ref().is_err());
        let second = cache.get("([unclosed");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
