//! Type-erased events.
//!
//! The arguments of one `send` call travel as a tuple. The tuple type is
//! the event's identity: handlers only ever see events whose argument
//! list matches their own parameter list exactly.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ChannelError, Result};

/// An ordered argument list that can be sent through a channel.
///
/// Implemented for tuples of up to eight `Send + Sync + 'static` elements,
/// including the empty tuple.
pub trait Args: Send + Sync + 'static {
    /// Key shared by every event carrying this argument list.
    fn key() -> EventTypeKey
    where
        Self: Sized,
    {
        EventTypeKey::of::<Self>()
    }
}

macro_rules! impl_args {
    ($($T:ident),*) => {
        impl<$($T: Send + Sync + 'static),*> Args for ($($T,)*) {}
    };
}

impl_args!();
impl_args!(A0);
impl_args!(A0, A1);
impl_args!(A0, A1, A2);
impl_args!(A0, A1, A2, A3);
impl_args!(A0, A1, A2, A3, A4);
impl_args!(A0, A1, A2, A3, A4, A5);
impl_args!(A0, A1, A2, A3, A4, A5, A6);
impl_args!(A0, A1, A2, A3, A4, A5, A6, A7);

/// Identity of an ordered argument-type list.
///
/// Two keys are equal iff they were derived from the same tuple type.
#[derive(Clone, Copy)]
pub struct EventTypeKey {
    id: TypeId,
    name: &'static str,
}

impl EventTypeKey {
    /// Key for the argument list `A`.
    pub fn of<A: Args>() -> Self {
        Self {
            id: TypeId::of::<A>(),
            name: type_name::<A>(),
        }
    }

    /// Human-readable argument list, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventTypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventTypeKey {}

impl Hash for EventTypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventTypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for EventTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A sent argument list, boxed behind a uniform container.
///
/// Cloning is cheap and shares the payload.
#[derive(Clone)]
pub struct Event {
    key: EventTypeKey,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Event {
    /// Boxes `args` and records its key.
    pub fn encode<A: Args>(args: A) -> Self {
        Self {
            key: A::key(),
            payload: Arc::new(args),
        }
    }

    /// Returns the key this event was encoded with.
    pub fn key(&self) -> EventTypeKey {
        self.key
    }

    /// Returns true if this event carries the argument list `A`.
    pub fn is<A: Args>(&self) -> bool {
        self.key == A::key()
    }

    /// Checked downcast back to the argument tuple.
    ///
    /// Fails with [`ChannelError::EventTypeMismatch`] when `A` is not the
    /// tuple type the event was encoded from.
    pub fn decode<A: Args>(&self) -> Result<&A> {
        self.payload
            .downcast_ref::<A>()
            .ok_or_else(|| ChannelError::EventTypeMismatch {
                expected: type_name::<A>(),
                actual: self.key.name,
            })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("key", &self.key).finish()
    }
}
