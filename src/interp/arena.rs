use core::hash::Hash;
use core::marker::PhantomData;

#[derive(serde::Serialize)]
pub struct Id<T> {
    index: u32,
    #[serde(skip)]
    _phantom: PhantomData<T>,
}
impl<T> Id<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self { index, _phantom: Default::default() }
    }
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }
}
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}
impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index.eq(&other.index)
    }
}
impl<T> Eq for Id<T> {}
impl<T> Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, h: &mut H) {
        self.index.hash(h);
    }
}
impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}
impl<T> core::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Append-only storage. Ids handed out are never invalidated, so they may be
/// copied freely into other structures (and into clones of the arena).
#[derive(Clone)]
pub struct Arena<T> {
    store: Vec<T>,
}
impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { store: vec![] }
    }
    pub fn alloc_with_id(&mut self, f: impl FnOnce(Id<T>) -> T) -> Id<T> {
        use std::convert::TryFrom;
        let id = Id::new(u32::try_from(self.store.len()).expect("Out of capacity!"));
        self.store.push(f(id));
        id
    }
    pub fn len(&self) -> usize {
        self.store.len()
    }
}
impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> core::ops::Index<Id<T>> for Arena<T> {
    type Output = T;
    fn index(&self, id: Id<T>) -> &Self::Output {
        self.store.index(id.index())
    }
}
impl<T> core::ops::IndexMut<Id<T>> for Arena<T> {
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        self.store.index_mut(id.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_across_clones() {
        let mut arena: Arena<&'static str> = Arena::new();
        let a = arena.alloc_with_id(|_| "a");
        let b = arena.alloc_with_id(|_| "b");
        assert_eq!(b.index(), 1);

        let mut copy = arena.clone();
        let c = copy.alloc_with_id(|_| "c");
        assert_eq!(copy[a], "a");
        assert_eq!(copy[b], "b");
        assert_eq!(copy[c], "c");
        assert_eq!(arena.len(), 2);
        assert_eq!(copy.len(), 3);
    }
}
