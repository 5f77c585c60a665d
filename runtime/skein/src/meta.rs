use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed metadata store carried by every buffer.
///
/// Holds at most one value per distinct Rust type. `set_meta` overwrites any
/// previous value of the same type; `get_meta` is pure and reports absence as
/// `None` rather than an error. Entries are `Arc`-shared, so cloning the map
/// (which happens when a blob fans out to several sinks) is cheap and
/// downstream readers observe the same values.
#[derive(Clone, Default)]
pub struct MetaMap {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, replacing any existing entry of type `T`.
    pub fn set_meta<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get_meta<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains_meta<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn remove_meta<T: Any + Send + Sync>(&mut self) -> bool {
        self.entries.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MetaMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetaMap({} entries)", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Stamp(u64);

    #[derive(Debug, Clone, PartialEq)]
    struct Other(&'static str);

    #[test]
    fn roundtrip() {
        let mut m = MetaMap::new();
        assert!(!m.contains_meta::<Stamp>());
        m.set_meta(Stamp(42));
        assert!(m.contains_meta::<Stamp>());
        assert_eq!(m.get_meta::<Stamp>(), Some(&Stamp(42)));
        assert_eq!(m.get_meta::<Other>(), None);
    }

    #[test]
    fn set_overwrites() {
        let mut m = MetaMap::new();
        m.set_meta(Stamp(1));
        m.set_meta(Stamp(2));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get_meta::<Stamp>(), Some(&Stamp(2)));
    }

    #[test]
    fn clone_shares_entries() {
        let mut m = MetaMap::new();
        m.set_meta(Other("x"));
        let m2 = m.clone();
        m.set_meta(Other("y"));
        assert_eq!(m2.get_meta::<Other>(), Some(&Other("x")));
        assert_eq!(m.get_meta::<Other>(), Some(&Other("y")));
    }
}
