//! Per-scope ordered sibling lists (cards per column, columns per board).
//!
//! Every operation keeps two properties: an identity appears in at most one
//! scope's list, and every list is sorted by position.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::position::{sort_by_position, Positioned};

pub trait ScopedEntity: Positioned + Clone + Debug {
    type Scope: Copy + Ord + Debug;

    fn id(&self) -> i64;
    fn scope(&self) -> Self::Scope;
    fn set_scope(&mut self, scope: Self::Scope);
}

impl ScopedEntity for crate::Card {
    type Scope = crate::ColumnId;

    fn id(&self) -> i64 {
        self.id
    }

    fn scope(&self) -> Self::Scope {
        self.column_id
    }

    fn set_scope(&mut self, scope: Self::Scope) {
        self.column_id = scope;
    }
}

impl ScopedEntity for crate::Column {
    type Scope = crate::BoardId;

    fn id(&self) -> i64 {
        self.id
    }

    fn scope(&self) -> Self::Scope {
        self.board_id
    }

    fn set_scope(&mut self, scope: Self::Scope) {
        self.board_id = scope;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone)]
pub struct OrderedLists<T: ScopedEntity> {
    lists: BTreeMap<T::Scope, Vec<T>>,
}

impl<T: ScopedEntity> OrderedLists<T> {
    pub fn new() -> Self {
        Self {
            lists: BTreeMap::new(),
        }
    }

    pub fn list(&self, scope: T::Scope) -> &[T] {
        self.lists.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scopes(&self) -> impl Iterator<Item = T::Scope> + '_ {
        self.lists.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.lists.values().flatten()
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    /// Every scope whose list currently holds `id`. More than one entry means
    /// the single-presence invariant was broken.
    pub fn scopes_containing(&self, id: i64) -> Vec<T::Scope> {
        self.lists
            .iter()
            .filter(|(_, items)| items.iter().any(|item| item.id() == id))
            .map(|(scope, _)| *scope)
            .collect()
    }

    /// Replaces one scope's list wholesale; ids in `items` are removed from
    /// every other scope first.
    pub fn replace_scope(&mut self, scope: T::Scope, mut items: Vec<T>) {
        for item in items.iter_mut() {
            item.set_scope(scope);
        }
        for (other, list) in self.lists.iter_mut() {
            if *other != scope {
                list.retain(|existing| items.iter().all(|item| item.id() != existing.id()));
            }
        }
        sort_by_position(&mut items);
        self.lists.insert(scope, items);
    }

    /// Replace-by-identity within the entity's own scope, or append there.
    /// Copies held by any other scope are dropped.
    pub fn upsert(&mut self, entity: T) -> Upserted {
        let scope = entity.scope();
        let id = entity.id();
        for (other, list) in self.lists.iter_mut() {
            if *other != scope {
                list.retain(|existing| existing.id() != id);
            }
        }

        let list = self.lists.entry(scope).or_default();
        let outcome = match list.iter_mut().find(|existing| existing.id() == id) {
            Some(slot) => {
                *slot = entity;
                Upserted::Replaced
            }
            None => {
                list.push(entity);
                Upserted::Inserted
            }
        };
        sort_by_position(list);
        outcome
    }

    /// Removes `id` from every scope; returns the first copy found.
    pub fn remove(&mut self, id: i64) -> Option<T> {
        let mut removed = None;
        for list in self.lists.values_mut() {
            if let Some(index) = list.iter().position(|item| item.id() == id) {
                let item = list.remove(index);
                if removed.is_none() {
                    removed = Some(item);
                }
                list.retain(|item| item.id() != id);
            }
        }
        removed
    }

    /// Remove everywhere, then insert once into `scope` at `position`.
    pub fn relocate(&mut self, mut entity: T, scope: T::Scope, position: f64) {
        self.remove(entity.id());
        entity.set_scope(scope);
        entity.set_position(position);
        let list = self.lists.entry(scope).or_default();
        list.push(entity);
        sort_by_position(list);
    }

    pub fn drop_scope(&mut self, scope: T::Scope) -> Vec<T> {
        self.lists.remove(&scope).unwrap_or_default()
    }

    pub fn list_mut(&mut self, scope: T::Scope) -> Option<&mut Vec<T>> {
        self.lists.get_mut(&scope)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.lists.values_mut().flatten()
    }
}

impl<T: ScopedEntity> Default for OrderedLists<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Card;

    fn card(id: i64, column_id: i64, position: f64) -> Card {
        Card::new(id, column_id, format!("Card {}", id), position)
    }

    fn ids(lists: &OrderedLists<Card>, scope: i64) -> Vec<i64> {
        lists.list(scope).iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_replace_scope_sorts_and_steals_from_other_scopes() {
        let mut lists = OrderedLists::new();
        lists.upsert(card(1, 10, 1.0));
        lists.replace_scope(20, vec![card(2, 20, 5.0), card(1, 10, 3.0)]);

        assert_eq!(ids(&lists, 10), Vec::<i64>::new());
        assert_eq!(ids(&lists, 20), vec![1, 2]);
        assert_eq!(lists.get(1).unwrap().column_id, 20);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut lists = OrderedLists::new();
        assert_eq!(lists.upsert(card(1, 10, 1.0)), Upserted::Inserted);
        let mut renamed = card(1, 10, 1.0);
        renamed.title = "Renamed".to_string();
        assert_eq!(lists.upsert(renamed), Upserted::Replaced);

        assert_eq!(lists.list(10).len(), 1);
        assert_eq!(lists.list(10)[0].title, "Renamed");
    }

    #[test]
    fn test_upsert_into_new_scope_leaves_single_copy() {
        let mut lists = OrderedLists::new();
        lists.upsert(card(1, 10, 1.0));
        lists.upsert(card(1, 20, 1.0));

        assert_eq!(lists.scopes_containing(1), vec![20]);
    }

    #[test]
    fn test_remove_clears_every_scope() {
        let mut lists = OrderedLists::new();
        lists.upsert(card(1, 10, 1.0));
        // Simulate a corrupted view holding the card twice.
        lists.list_mut(10).unwrap().push(card(1, 10, 2.0));
        lists.lists.entry(30).or_default().push(card(1, 30, 1.0));

        let removed = lists.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert!(lists.scopes_containing(1).is_empty());
        assert!(lists.remove(1).is_none());
    }

    #[test]
    fn test_relocate_sorts_target() {
        let mut lists = OrderedLists::new();
        lists.upsert(card(1, 10, 1.0));
        lists.upsert(card(2, 20, 50.0));
        lists.relocate(card(1, 10, 1.0), 20, 10.0);

        assert_eq!(ids(&lists, 10), Vec::<i64>::new());
        assert_eq!(ids(&lists, 20), vec![1, 2]);
        assert_eq!(lists.get(1).unwrap().position, 10.0);
    }
}
