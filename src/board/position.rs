//! Position allocator.
//!
//! Pure computation over an in-memory ordered sibling list. The engine keeps
//! positions dense (`0..n-1`) by renumbering on every write: inserting at
//! index `i` assigns `i` to the moved entity and shifts every sibling at or
//! after `i` by one. Only siblings whose stored value actually changes are
//! reported, so a no-op move produces no writes.

use std::collections::HashSet;

use super::models::{Card, Column};

/// An entity that occupies a slot in an ordered sibling list.
pub trait Ordered {
    fn id(&self) -> &str;
    fn position(&self) -> i32;
}

impl Ordered for Card {
    fn id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> i32 {
        self.position
    }
}

impl Ordered for Column {
    fn id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> i32 {
        self.order
    }
}

/// A pending write of an order value for one sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub id: String,
    pub position: i32,
}

impl Placement {
    pub fn new(id: impl Into<String>, position: i32) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// Result of [`allocate`]: the moved entity's new value plus every sibling
/// that must be rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub value: i32,
    pub affected: Vec<Placement>,
}

/// Compute the insertion slot for an entity entering `siblings`.
///
/// `siblings` must be ordered by position and must not contain the moving
/// entity. `desired_index` is clamped to `[0, len]`; `None` appends.
pub fn allocate<S: Ordered>(siblings: &[S], desired_index: Option<usize>) -> Allocation {
    let len = siblings.len();
    let index = desired_index.map_or(len, |i| i.min(len));

    let affected = siblings
        .iter()
        .enumerate()
        .filter_map(|(i, sibling)| {
            let target = (if i < index { i } else { i + 1 }) as i32;
            (sibling.position() != target).then(|| Placement::new(sibling.id(), target))
        })
        .collect();

    Allocation {
        value: index as i32,
        affected,
    }
}

/// Renumber an ordered list to `0..n-1`, returning only changed rows.
/// Used after a removal leaves a gap.
pub fn resequence<S: Ordered>(siblings: &[S]) -> Vec<Placement> {
    siblings
        .iter()
        .enumerate()
        .filter(|(i, sibling)| sibling.position() != *i as i32)
        .map(|(i, sibling)| Placement::new(sibling.id(), i as i32))
        .collect()
}

/// Why a requested ordering is not a permutation of the current siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermutationError {
    Duplicate(String),
    Foreign(String),
    Missing(Vec<String>),
}

impl std::fmt::Display for PermutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "id {} appears more than once", id),
            Self::Foreign(id) => write!(f, "id {} does not belong to this container", id),
            Self::Missing(ids) => write!(f, "missing ids: {}", ids.join(", ")),
        }
    }
}

/// Check that `requested` is a permutation of `current` and return the
/// writes that make each id's position equal its index in `requested`.
pub fn plan_permutation<S: Ordered>(
    current: &[S],
    requested: &[String],
) -> Result<Vec<Placement>, PermutationError> {
    let known: HashSet<&str> = current.iter().map(|s| s.id()).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(requested.len());

    for id in requested {
        if !known.contains(id.as_str()) {
            return Err(PermutationError::Foreign(id.clone()));
        }
        if !seen.insert(id.as_str()) {
            return Err(PermutationError::Duplicate(id.clone()));
        }
    }

    if seen.len() != known.len() {
        let missing = current
            .iter()
            .filter(|s| !seen.contains(s.id()))
            .map(|s| s.id().to_string())
            .collect();
        return Err(PermutationError::Missing(missing));
    }

    let by_id: std::collections::HashMap<&str, i32> =
        current.iter().map(|s| (s.id(), s.position())).collect();

    Ok(requested
        .iter()
        .enumerate()
        .filter(|(i, id)| by_id.get(id.as_str()) != Some(&(*i as i32)))
        .map(|(i, id)| Placement::new(id.clone(), i as i32))
        .collect())
}

/// True when `positions` is exactly `{0, .., n-1}`.
pub fn is_dense(positions: &[i32]) -> bool {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(i, p)| *p == i as i32)
}
