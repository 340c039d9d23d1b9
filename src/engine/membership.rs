/// Membership sets of haiku symbols
///
/// The allowlist mutates at runtime under concurrent classifier tasks, so
/// membership lives behind a writer lock. Sets stay small (tens to hundreds
/// of symbols), a linear scan is fine.

use tokio::sync::RwLock;

/// An insertion-ordered set of haiku symbols
#[derive(Debug)]
pub struct SymbolSet {
    inner: RwLock<Vec<String>>,
}

/// Drop duplicate symbols, keeping first-occurrence order
pub fn dedup_symbols(initial: Vec<String>) -> Vec<String> {
    let mut symbols = Vec::with_capacity(initial.len());
    for sym in initial {
        if !symbols.contains(&sym) {
            symbols.push(sym);
        }
    }
    symbols
}

impl SymbolSet {
    /// Create a set from initial symbols, deduplicating but keeping order
    pub fn new(initial: Vec<String>) -> Self {
        Self {
            inner: RwLock::new(dedup_symbols(initial)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Consistent membership read
    pub async fn contains(&self, symbol: &str) -> bool {
        self.inner.read().await.iter().any(|s| s == symbol)
    }

    /// Idempotent insert; returns true when the symbol was new
    pub async fn insert(&self, symbol: &str) -> bool {
        let mut symbols = self.inner.write().await;
        if symbols.iter().any(|s| s == symbol) {
            return false;
        }
        symbols.push(symbol.to_string());
        true
    }

    /// Frozen copy, for the shutdown diff
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Symbols present in `current` but not in `original`, in insertion order
pub fn difference(current: &[String], original: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|sym| !original.contains(sym))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let set = SymbolSet::empty();
        assert!(set.insert("blue-frog").await);
        assert!(!set.insert("blue-frog").await);
        assert_eq!(set.len().await, 1);
        assert!(set.contains("blue-frog").await);
        assert!(!set.contains("red-frog").await);
    }

    #[tokio::test]
    async fn test_initial_deduplication() {
        let set = SymbolSet::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(set.snapshot().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let set = SymbolSet::new(vec!["a".to_string()]);
        let snapshot = set.snapshot().await;
        set.insert("b").await;
        assert_eq!(snapshot, vec!["a".to_string()]);
        assert_eq!(set.len().await, 2);
    }

    #[test]
    fn test_difference_preserves_order() {
        let original = vec!["a".to_string(), "b".to_string()];
        let current = vec![
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
            "d".to_string(),
        ];
        assert_eq!(
            difference(&current, &original),
            vec!["c".to_string(), "d".to_string()]
        );
        assert!(difference(&original, &original).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        use std::sync::Arc;

        let set = Arc::new(SymbolSet::empty());
        let mut handles = Vec::new();
        for i in 0..16 {
            let set = Arc::clone(&set);
            handles.push(tokio::spawn(async move {
                set.insert(&format!("sym-{}", i % 4)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(set.len().await, 4);
    }
}
