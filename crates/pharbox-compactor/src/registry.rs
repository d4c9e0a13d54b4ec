//! Symbols recorded while scoping

use std::collections::BTreeMap;

/// Classes and functions renamed by a scoper, original name to prefixed name
///
/// Registries merge by union. When both sides record the same symbol with
/// different targets the lexicographically smaller target is kept, so merging
/// is commutative, associative and idempotent and the result does not depend
/// on the order partial registries arrive in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolsRegistry {
    functions: BTreeMap<String, String>,
    classes: BTreeMap<String, String>,
}

impl SymbolsRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a renamed function
    pub fn record_function(&mut self, original: impl Into<String>, prefixed: impl Into<String>) {
        insert_min(&mut self.functions, original.into(), prefixed.into());
    }

    /// Record a renamed class, interface, trait or enum
    pub fn record_class(&mut self, original: impl Into<String>, prefixed: impl Into<String>) {
        insert_min(&mut self.classes, original.into(), prefixed.into());
    }

    /// Recorded functions
    pub fn functions(&self) -> &BTreeMap<String, String> {
        &self.functions
    }

    /// Recorded classes
    pub fn classes(&self) -> &BTreeMap<String, String> {
        &self.classes
    }

    /// Total number of recorded symbols
    pub fn count(&self) -> usize {
        self.functions.len() + self.classes.len()
    }

    /// Check whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.classes.is_empty()
    }

    /// Merge `other` into this registry
    pub fn merge(&mut self, other: &Self) {
        for (original, prefixed) in &other.functions {
            insert_min(&mut self.functions, original.clone(), prefixed.clone());
        }
        for (original, prefixed) in &other.classes {
            insert_min(&mut self.classes, original.clone(), prefixed.clone());
        }
    }

    /// Union of partial registries, skipping empty ones
    pub fn union<'a, I>(partials: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
    {
        partials
            .into_iter()
            .filter(|partial| !partial.is_empty())
            .fold(Self::new(), |mut acc, partial| {
                acc.merge(partial);
                acc
            })
    }
}

fn insert_min(map: &mut BTreeMap<String, String>, original: String, prefixed: String) {
    map.entry(original)
        .and_modify(|current| {
            if prefixed < *current {
                current.clone_from(&prefixed);
            }
        })
        .or_insert(prefixed);
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn registry(classes: &[(&str, &str)], functions: &[(&str, &str)]) -> SymbolsRegistry {
        let mut registry = SymbolsRegistry::new();
        for (original, prefixed) in classes {
            registry.record_class(*original, *prefixed);
        }
        for (original, prefixed) in functions {
            registry.record_function(*original, *prefixed);
        }
        registry
    }

    #[test]
    fn test_union_of_partials() {
        let a = registry(&[("App\\A", "P\\App\\A")], &[]);
        let b = registry(&[("App\\B", "P\\App\\B")], &[("App\\f", "P\\App\\f")]);
        let empty = SymbolsRegistry::new();

        let union = SymbolsRegistry::union([&a, &empty, &b, &a]);
        assert_eq!(union.count(), 3);
        assert_eq!(union.classes().get("App\\B").unwrap(), "P\\App\\B");
        assert_eq!(union.functions().get("App\\f").unwrap(), "P\\App\\f");
    }

    #[test]
    fn test_union_of_nothing_is_empty() {
        assert!(SymbolsRegistry::union(std::iter::empty()).is_empty());
    }

    fn arb_registry() -> impl Strategy<Value = SymbolsRegistry> {
        (
            prop::collection::vec(("[A-C]{1,2}", "[a-c]{1,2}"), 0..6),
            prop::collection::vec(("[A-C]{1,2}", "[a-c]{1,2}"), 0..6),
        )
            .prop_map(|(classes, functions)| {
                let mut registry = SymbolsRegistry::new();
                for (original, prefixed) in classes {
                    registry.record_class(original, prefixed);
                }
                for (original, prefixed) in functions {
                    registry.record_function(original, prefixed);
                }
                registry
            })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_registry(), b in arb_registry()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_is_idempotent(a in arb_registry()) {
            let mut aa = a.clone();
            aa.merge(&a);
            prop_assert_eq!(aa, a);
        }

        #[test]
        fn union_ignores_grouping(a in arb_registry(), b in arb_registry(), c in arb_registry()) {
            let left = SymbolsRegistry::union([&SymbolsRegistry::union([&a, &b]), &c]);
            let right = SymbolsRegistry::union([&a, &SymbolsRegistry::union([&b, &c])]);
            prop_assert_eq!(left, right);
        }
    }
}
