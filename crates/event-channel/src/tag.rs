//! Handler tags.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Spreads method hashes away from neighbouring object addresses.
const METHOD_MULTIPLIER: u64 = 37;

/// Opaque identifier of one subscription within an event bucket.
///
/// Tags derived from a function or a bound method are stable: subscribing
/// the same target twice yields the same tag, and the second registration
/// replaces the first. Tags handed out for opaque callables come from a
/// per-channel counter and live in a separate space, so they never
/// collide with derived ones.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerTag(Repr);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Repr {
    Derived(u64),
    Counter(u64),
}

impl HandlerTag {
    /// Tag of a fn item or other zero-sized callable.
    ///
    /// Every fn item has its own type, so the type identifies the function.
    pub(crate) fn of_function<F: 'static>() -> Self {
        HandlerTag(Repr::Derived(type_hash::<F>()))
    }

    /// Tag of a function pointer, from the address it points to.
    pub(crate) fn of_address(addr: usize) -> Self {
        HandlerTag(Repr::Derived(addr as u64))
    }

    /// Tag of `method` bound to the object at `target`.
    ///
    /// Not cryptographically unique: address and method hash are combined
    /// with wrapping arithmetic.
    pub(crate) fn of_method<T, M: 'static>(target: *const T) -> Self {
        let addr = target as usize as u64;
        HandlerTag(Repr::Derived(
            addr.wrapping_add(type_hash::<M>().wrapping_mul(METHOD_MULTIPLIER)),
        ))
    }

    /// Tag assigned from a channel's counter.
    pub(crate) fn from_counter(n: u64) -> Self {
        HandlerTag(Repr::Counter(n))
    }

    /// Returns true if this tag was handed out for an opaque callable.
    pub fn is_counter(&self) -> bool {
        matches!(self.0, Repr::Counter(_))
    }
}

impl fmt::Debug for HandlerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerTag({})", self)
    }
}

impl fmt::Display for HandlerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Repr::Derived(v) => write!(f, "d:{:016x}", v),
            Repr::Counter(n) => write!(f, "c:{}", n),
        }
    }
}

fn type_hash<T: 'static>() -> u64 {
    let mut hasher = DefaultHasher::new();
    TypeId::of::<T>().hash(&mut hasher);
    hasher.finish()
}
