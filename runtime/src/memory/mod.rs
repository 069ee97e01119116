//! Flat, reference-addressed store for all runtime state.
//!
//! Blocks never own their state directly. Each piece lives in a cell that is
//! addressed by a [`MemoryReference`] carrying the owner, a kind tag and a
//! visibility. Children discover what ancestors publish by searching on
//! those fields, and releasing a block's owner wipes everything it made.

mod context;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use tracing::trace;

pub use context::BlockContext;
pub use value::{MemoryType, MemoryValue};

use crate::block::BlockKey;
use crate::error::RuntimeError;

pub type MemoryId = u64;

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Visibility {
    /// Readable by descendants through search.
    Public,
    /// Only meaningful to the owner.
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Owner {
    Runtime,
    Block(BlockKey),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Runtime => write!(f, "runtime"),
            Owner::Block(key) => write!(f, "{}", key),
        }
    }
}

/// Address of one memory cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryReference {
    pub id: MemoryId,
    pub kind: String,
    pub owner: Owner,
    pub visibility: Visibility,
}

/// A reference that remembers what type its cell holds.
pub struct TypedMemoryReference<T> {
    reference: MemoryReference,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedMemoryReference<T> {
    fn new(reference: MemoryReference) -> Self {
        TypedMemoryReference {
            reference,
            _marker: PhantomData,
        }
    }

    pub fn reference(&self) -> &MemoryReference {
        &self.reference
    }

    pub fn id(&self) -> MemoryId {
        self.reference.id
    }
}

impl<T> Clone for TypedMemoryReference<T> {
    fn clone(&self) -> Self {
        TypedMemoryReference::new(self.reference.clone())
    }
}

impl<T> fmt::Debug for TypedMemoryReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedMemoryReference")
            .field(&self.reference)
            .finish()
    }
}

/// Search filter. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub id: Option<MemoryId>,
    pub owner: Option<Owner>,
    pub kind: Option<String>,
    pub visibility: Option<Visibility>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        SearchCriteria::default()
    }

    pub fn with_id(mut self, id: MemoryId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn of_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.visibility = Some(Visibility::Public);
        self
    }

    fn matches(&self, reference: &MemoryReference) -> bool {
        self.id.is_none_or(|id| reference.id == id)
            && self.owner.is_none_or(|owner| reference.owner == owner)
            && self.kind.as_deref().is_none_or(|kind| reference.kind == kind)
            && self.visibility.is_none_or(|v| reference.visibility == v)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum MemoryEvent<'a> {
    Allocated {
        reference: &'a MemoryReference,
        value: &'a MemoryValue,
    },
    Updated {
        reference: &'a MemoryReference,
        value: &'a MemoryValue,
        old: &'a MemoryValue,
    },
    Released {
        reference: &'a MemoryReference,
        old: &'a MemoryValue,
    },
}

impl MemoryEvent<'_> {
    pub fn reference(&self) -> &MemoryReference {
        match self {
            MemoryEvent::Allocated { reference, .. }
            | MemoryEvent::Updated { reference, .. }
            | MemoryEvent::Released { reference, .. } => reference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&MemoryEvent<'_>)>;

fn notify(subscribers: &mut [(SubscriptionId, Subscriber)], event: &MemoryEvent<'_>) {
    for (_, subscriber) in subscribers.iter_mut() {
        subscriber(event);
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

struct Cell {
    reference: MemoryReference,
    value: MemoryValue,
    parent: Option<MemoryId>,
    children: Vec<MemoryId>,
}

/// A cell as seen by [`Memory::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    pub reference: MemoryReference,
    pub value: MemoryValue,
}

#[derive(Default)]
pub struct Memory {
    /// Keyed by id; ids only grow, so iteration is allocation order.
    cells: BTreeMap<MemoryId, Cell>,
    next_id: MemoryId,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("cells", &self.cells.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn allocate<T: MemoryType>(
        &mut self,
        kind: &str,
        owner: Owner,
        value: T,
        visibility: Visibility,
    ) -> TypedMemoryReference<T> {
        self.insert(kind, owner, value.into_value(), visibility, None)
    }

    /// Allocate a cell that is released together with `parent`. The child
    /// inherits the parent's owner.
    pub fn allocate_child<T: MemoryType>(
        &mut self,
        parent: &MemoryReference,
        kind: &str,
        value: T,
        visibility: Visibility,
    ) -> Result<TypedMemoryReference<T>, RuntimeError> {
        if !self.is_valid(parent) {
            return Err(invalid(parent));
        }
        Ok(self.insert(kind, parent.owner, value.into_value(), visibility, Some(parent.id)))
    }

    fn insert<T>(
        &mut self,
        kind: &str,
        owner: Owner,
        value: MemoryValue,
        visibility: Visibility,
        parent: Option<MemoryId>,
    ) -> TypedMemoryReference<T> {
        self.next_id += 1;
        let reference = MemoryReference {
            id: self.next_id,
            kind: kind.to_string(),
            owner,
            visibility,
        };
        trace!(id = reference.id, kind, %owner, "allocate");

        if let Some(parent) = parent.and_then(|id| self.cells.get_mut(&id)) {
            parent.children.push(reference.id);
        }
        let cell = Cell {
            reference: reference.clone(),
            value,
            parent,
            children: Vec::new(),
        };
        notify(
            &mut self.subscribers,
            &MemoryEvent::Allocated {
                reference: &cell.reference,
                value: &cell.value,
            },
        );
        self.cells.insert(reference.id, cell);
        TypedMemoryReference::new(reference)
    }

    pub fn is_valid(&self, reference: &MemoryReference) -> bool {
        self.cells.contains_key(&reference.id)
    }

    /// Current value, or `None` once the cell is released.
    pub fn get<T: MemoryType>(&self, reference: &TypedMemoryReference<T>) -> Option<T> {
        self.get_value(reference.reference()).and_then(T::from_value)
    }

    pub fn get_value(&self, reference: &MemoryReference) -> Option<&MemoryValue> {
        self.cells.get(&reference.id).map(|c| &c.value)
    }

    /// Re-type an untyped reference, e.g. one returned by [`Memory::search`].
    /// `None` if the cell is gone or holds a different type.
    pub fn typed<T: MemoryType>(&self, reference: &MemoryReference) -> Option<TypedMemoryReference<T>> {
        let value = self.get_value(reference)?;
        T::from_value(value).map(|_| TypedMemoryReference::new(reference.clone()))
    }

    pub fn set<T: MemoryType>(
        &mut self,
        reference: &TypedMemoryReference<T>,
        value: T,
    ) -> Result<(), RuntimeError> {
        let reference = reference.reference();
        let cell = self
            .cells
            .get_mut(&reference.id)
            .ok_or_else(|| invalid(reference))?;
        if T::from_value(&cell.value).is_none() {
            return Err(RuntimeError::TypeMismatch {
                id: reference.id,
                expected: T::TYPE_NAME,
                got: cell.value.type_name(),
            });
        }
        let old = std::mem::replace(&mut cell.value, value.into_value());
        notify(
            &mut self.subscribers,
            &MemoryEvent::Updated {
                reference: &cell.reference,
                value: &cell.value,
                old: &old,
            },
        );
        Ok(())
    }

    /// Read, modify and write back a cell.
    pub fn update<T: MemoryType>(
        &mut self,
        reference: &TypedMemoryReference<T>,
        f: impl FnOnce(&mut T),
    ) -> Result<(), RuntimeError> {
        let mut value = self
            .get(reference)
            .ok_or_else(|| invalid(reference.reference()))?;
        f(&mut value);
        self.set(reference, value)
    }

    /// References matching every set field of `criteria`, in allocation order.
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<MemoryReference> {
        self.cells
            .values()
            .filter(|c| criteria.matches(&c.reference))
            .map(|c| c.reference.clone())
            .collect()
    }

    /// Values of every live cell of type `T` matching `criteria`.
    pub fn search_values<T: MemoryType>(&self, criteria: &SearchCriteria) -> Vec<T> {
        self.cells
            .values()
            .filter(|c| criteria.matches(&c.reference))
            .filter_map(|c| T::from_value(&c.value))
            .collect()
    }

    /// Release a cell and, recursively, every child allocated under it.
    /// Releasing an already released reference does nothing.
    pub fn release(&mut self, reference: &MemoryReference) {
        let Some(cell) = self.cells.remove(&reference.id) else {
            return;
        };
        if let Some(parent) = cell.parent.and_then(|id| self.cells.get_mut(&id)) {
            parent.children.retain(|&c| c != cell.reference.id);
        }
        for child in &cell.children {
            if let Some(child) = self.cells.get(child).map(|c| c.reference.clone()) {
                self.release(&child);
            }
        }
        trace!(id = cell.reference.id, kind = %cell.reference.kind, "release");
        notify(
            &mut self.subscribers,
            &MemoryEvent::Released {
                reference: &cell.reference,
                old: &cell.value,
            },
        );
    }

    /// Release everything owned by `owner`. Returns how many cells went.
    pub fn release_owner(&mut self, owner: Owner) -> usize {
        let before = self.cells.len();
        for reference in self.search(&SearchCriteria::new().owned_by(owner)) {
            self.release(&reference);
        }
        before - self.cells.len()
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&MemoryEvent<'_>) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(s, _)| *s != id);
        before != self.subscribers.len()
    }

    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.cells
            .values()
            .map(|c| MemoryEntry {
                reference: c.reference.clone(),
                value: c.value.clone(),
            })
            .collect()
    }
}

fn invalid(reference: &MemoryReference) -> RuntimeError {
    RuntimeError::InvalidReference {
        id: reference.id,
        kind: reference.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::state::{LoopState, TimerDirection, TimerState};

    #[test]
    fn set_then_get() {
        let mut memory = Memory::new();
        let r = memory.allocate("loop-state", Owner::Block(BlockKey(1)), LoopState::new(Some(3), 2), Visibility::Private);
        memory.update(&r, |s| s.current_round = 2).unwrap();
        assert_eq!(memory.get(&r).unwrap().current_round, 2);
    }

    #[test]
    fn released_reference_reads_none_and_rejects_writes() {
        let mut memory = Memory::new();
        let r = memory.allocate("count", Owner::Runtime, 1i64, Visibility::Public);
        memory.release(r.reference());
        memory.release(r.reference());
        assert_eq!(memory.get(&r), None);
        assert!(matches!(memory.set(&r, 2), Err(RuntimeError::InvalidReference { .. })));
    }

    #[test]
    fn release_cascades_to_children() {
        let mut memory = Memory::new();
        let parent = memory.allocate("timer", Owner::Block(BlockKey(1)), TimerState::new(None, TimerDirection::Up), Visibility::Public);
        let child = memory
            .allocate_child(parent.reference(), "lap", 1i64, Visibility::Private)
            .unwrap();
        let grandchild = memory
            .allocate_child(child.reference(), "split", 2i64, Visibility::Private)
            .unwrap();
        assert_eq!(child.reference().owner, Owner::Block(BlockKey(1)));

        memory.release(parent.reference());
        assert!(!memory.is_valid(child.reference()));
        assert!(!memory.is_valid(grandchild.reference()));
        assert!(memory.is_empty());
    }

    #[test]
    fn allocate_child_of_released_parent_fails() {
        let mut memory = Memory::new();
        let parent = memory.allocate("p", Owner::Runtime, 0i64, Visibility::Public);
        memory.release(parent.reference());
        assert!(memory
            .allocate_child(parent.reference(), "c", 1i64, Visibility::Public)
            .is_err());
    }

    #[test]
    fn search_filters_and_keeps_allocation_order() {
        let mut memory = Memory::new();
        let a = Owner::Block(BlockKey(1));
        let b = Owner::Block(BlockKey(2));
        memory.allocate("metric", a, 1i64, Visibility::Public);
        memory.allocate("metric", b, 2i64, Visibility::Public);
        memory.allocate("metric", a, 3i64, Visibility::Private);
        memory.allocate("other", a, 4i64, Visibility::Public);

        let found = memory.search(&SearchCriteria::new().owned_by(a).of_kind("metric"));
        assert_eq!(found.len(), 2);
        assert!(found[0].id < found[1].id);

        let public: Vec<i64> =
            memory.search_values(&SearchCriteria::new().owned_by(a).of_kind("metric").public());
        assert_eq!(public, vec![1]);
    }

    #[test]
    fn set_with_wrong_type_is_rejected() {
        let mut memory = Memory::new();
        let r = memory.allocate("n", Owner::Runtime, 1i64, Visibility::Public);
        let untyped = r.reference().clone();
        assert!(memory.typed::<String>(&untyped).is_none());
        assert!(memory.typed::<i64>(&untyped).is_some());
    }

    #[test]
    fn subscribers_see_every_change() {
        let mut memory = Memory::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let id = memory.subscribe(move |event| {
            let tag = match event {
                MemoryEvent::Allocated { .. } => "allocated",
                MemoryEvent::Updated { .. } => "updated",
                MemoryEvent::Released { .. } => "released",
            };
            sink.borrow_mut().push(format!("{}:{}", tag, event.reference().kind));
        });

        let r = memory.allocate("n", Owner::Runtime, 1i64, Visibility::Public);
        memory.set(&r, 5).unwrap();
        memory.release(r.reference());
        assert!(memory.unsubscribe(id));
        memory.allocate("quiet", Owner::Runtime, 0i64, Visibility::Public);

        assert_eq!(*log.borrow(), vec!["allocated:n", "updated:n", "released:n"]);
    }

    #[test]
    fn release_owner_only_touches_that_owner() {
        let mut memory = Memory::new();
        memory.allocate("x", Owner::Block(BlockKey(1)), 1i64, Visibility::Public);
        memory.allocate("x", Owner::Block(BlockKey(1)), 2i64, Visibility::Private);
        let kept = memory.allocate("x", Owner::Runtime, 3i64, Visibility::Public);
        assert_eq!(memory.release_owner(Owner::Block(BlockKey(1))), 2);
        assert!(memory.is_valid(kept.reference()));
    }
}
