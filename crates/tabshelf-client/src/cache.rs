use std::time::{Duration, Instant};

use tabshelf_core::Scoped;

struct CachedScope<E: Scoped> {
    parent: E::ParentId,
    items: Vec<E>,
    fetched_at: Instant,
}

/// Client-side copy of server sibling lists, keyed by parent.
///
/// Lists are only ever replaced whole: [`Mirror::store`] for authoritative server lists,
/// [`Mirror::stage`] for predicted ones. A stored list expires `ttl` after it was fetched;
/// staging does not extend its lifetime.
pub struct Mirror<E: Scoped> {
    ttl: Duration,
    scopes: Vec<CachedScope<E>>,
}

impl<E: Scoped> Mirror<E> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, scopes: Vec::new() }
    }

    fn slot(&self, parent: &E::ParentId) -> Option<&CachedScope<E>> {
        self.scopes.iter().find(|scope| &scope.parent == parent)
    }

    fn slot_mut(&mut self, parent: &E::ParentId) -> Option<&mut CachedScope<E>> {
        self.scopes.iter_mut().find(|scope| &scope.parent == parent)
    }

    /// Cached list for `parent`, fresh or not.
    #[must_use]
    pub fn get(&self, parent: &E::ParentId) -> Option<&[E]> {
        self.slot(parent).map(|scope| scope.items.as_slice())
    }

    /// Cached list for `parent` if it was fetched less than `ttl` before `now`.
    #[must_use]
    pub fn fresh(&self, parent: &E::ParentId, now: Instant) -> Option<&[E]> {
        self.slot(parent)
            .filter(|scope| now.saturating_duration_since(scope.fetched_at) < self.ttl)
            .map(|scope| scope.items.as_slice())
    }

    /// Record an authoritative server list.
    pub fn store(&mut self, parent: E::ParentId, items: Vec<E>) {
        let fetched_at = Instant::now();
        if let Some(scope) = self.slot_mut(&parent) {
            scope.items = items;
            scope.fetched_at = fetched_at;
            return;
        }
        self.scopes.push(CachedScope { parent, items, fetched_at });
    }

    /// Replace a cached list with a predicted one. Uncached scopes are left alone.
    pub fn stage(&mut self, parent: &E::ParentId, items: Vec<E>) {
        if let Some(scope) = self.slot_mut(parent) {
            scope.items = items;
        }
    }

    pub fn invalidate(&mut self, parent: &E::ParentId) {
        self.scopes.retain(|scope| &scope.parent != parent);
    }

    /// Parent and current list of the cached scope holding `id`.
    #[must_use]
    pub fn locate(&self, id: E::Id) -> Option<(E::ParentId, Vec<E>)> {
        self.scopes
            .iter()
            .find(|scope| scope.items.iter().any(|item| item.id() == id))
            .map(|scope| (scope.parent.clone(), scope.items.clone()))
    }

    #[must_use]
    pub fn contains(&self, parent: &E::ParentId, id: E::Id) -> bool {
        self.get(parent).is_some_and(|items| items.iter().any(|item| item.id() == id))
    }
}
