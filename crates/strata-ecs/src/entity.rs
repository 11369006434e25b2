//! Entity handles and slot states.
//!
//! An [`Entity`] is a plain 32-bit id. The value 0 is reserved as "none":
//! it never refers to a live entity and is what a tombstoned reference slot
//! dereferences to. Ids are recycled after destruction; the world tombstones
//! incoming references eagerly at destroy time so a recycled id can never be
//! reached through a stale reference slot.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A 32-bit entity handle. `Entity::NONE` (0) means "no entity".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// The reserved "no entity" value.
    pub const NONE: Entity = Entity(0);

    /// Reconstruct from a raw id.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Entity(raw)
    }

    /// The raw id value.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this handle is the reserved "none" value.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether this handle refers to some entity (possibly dead).
    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NONE
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "e-none")
        } else {
            write!(f, "e{}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// SlotState
// ---------------------------------------------------------------------------

/// Lifecycle and enable state of an entity slot.
///
/// `DisabledInherited` means the entity is enabled in its own right but some
/// ancestor is disabled. It is only ever produced by propagation from
/// [`set_enabled`](crate::world::World::set_enabled) or
/// [`set_parent`](crate::world::World::set_parent), never set directly.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SlotState {
    /// The id is not allocated (or has been destroyed and awaits recycling).
    Free,
    /// Alive and enabled, with no disabled ancestor.
    Enabled,
    /// Alive and explicitly disabled.
    Disabled,
    /// Alive, self-enabled, but disabled through an ancestor.
    DisabledInherited,
}

impl SlotState {
    /// Whether the slot holds a live entity.
    #[inline]
    pub fn is_alive(self) -> bool {
        self != SlotState::Free
    }

    /// The observed enabled state: enabled in its own right *and* through
    /// every ancestor.
    #[inline]
    pub fn is_observed_enabled(self) -> bool {
        self == SlotState::Enabled
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_zero() {
        assert_eq!(Entity::NONE.to_raw(), 0);
        assert!(Entity::NONE.is_none());
        assert!(Entity::from_raw(1).is_some());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(Entity::from_raw(17).to_string(), "e17");
        assert_eq!(Entity::NONE.to_string(), "e-none");
    }

    #[test]
    fn observed_enabled_only_for_enabled() {
        assert!(SlotState::Enabled.is_observed_enabled());
        assert!(!SlotState::Disabled.is_observed_enabled());
        assert!(!SlotState::DisabledInherited.is_observed_enabled());
        assert!(!SlotState::Free.is_observed_enabled());
        assert!(SlotState::DisabledInherited.is_alive());
        assert!(!SlotState::Free.is_alive());
    }
}
