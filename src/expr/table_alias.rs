use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ALIAS: AtomicU64 = AtomicU64::new(1);

/// Identity of one row source inside a query.
///
/// Two aliases are equal only if they came from the same `TableAlias::new()`
/// call. An alias never carries a display name; names (`t0`, `A0`, ...) are
/// assigned by whoever prints the tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableAlias(u64);

impl TableAlias {
    pub fn new() -> Self {
        TableAlias(NEXT_ALIAS.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for TableAlias {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for TableAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::TableAlias;
    use std::collections::HashSet;

    #[test]
    fn fresh_aliases_are_never_equal() {
        let a = TableAlias::new();
        let b = TableAlias::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn copies_share_identity() {
        let a = TableAlias::new();
        let copy = a;
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&copy));
    }
}
