//! Callable adapters for the supported subscription shapes.
//!
//! Handlers take their arguments by shared reference: one event may reach
//! many handlers, some of them concurrently, and nothing is cloned.

use std::any::{self, Any};
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use crate::error::{ChannelError, Result};
use crate::event::{Args, Event};
use crate::tag::HandlerTag;

/// A plain callable receiving the argument list `A`.
///
/// Implemented for every `Fn(&A0, .., &An)` that is `Send + Sync + 'static`.
pub trait Handler<A: Args>: Send + Sync + 'static {
    /// Invokes the handler.
    fn call(&self, args: &A);
}

/// A method of `T` receiving the argument list `A`.
///
/// Implemented for every `Fn(&T, &A0, .., &An)`, which covers method items
/// such as `Widget::on_value` taking `&self`.
pub trait Method<T, A: Args>: Send + Sync + 'static {
    /// Invokes the method on `target`.
    fn call(&self, target: &T, args: &A);
}

mod sealed {
    pub trait Sealed<A> {}
}

/// A free function accepted by [`crate::EventChannel::subscribe_fn`].
///
/// Implemented for fn items, fn pointers and other non-capturing callables.
/// Fn items are identified by their type and fn pointers by their address,
/// so `f` and `f as fn(&i32)` are two different subscriptions.
///
/// A closure that captures state has no stable identity. If it is larger
/// than a pointer it is rejected at compile time; otherwise
/// [`FreeFn::tag`] fails with [`ChannelError::NotAFunction`].
pub trait FreeFn<A: Args>: Handler<A> + sealed::Sealed<A> {
    /// Identity of this function.
    fn tag(&self) -> Result<HandlerTag>;
}

/// Compile-time check that `Self` can be a fn item (zero-sized) or a fn
/// pointer `P`.
trait FnShape<P> {
    const CHECK: ();
}

impl<F, P> FnShape<P> for F {
    const CHECK: () = assert!(
        mem::size_of::<F>() == 0 || mem::size_of::<F>() == mem::size_of::<P>(),
        "subscribe_fn takes a fn item or fn pointer; use subscribe for closures that capture state"
    );
}

macro_rules! impl_handlers {
    ($($T:ident $v:ident),*) => {
        impl<F, $($T),*> Handler<($($T,)*)> for F
        where
            F: Fn($(&$T),*) + Send + Sync + 'static,
            $($T: Send + Sync + 'static,)*
        {
            fn call(&self, args: &($($T,)*)) {
                let ($($v,)*) = args;
                (self)($($v),*)
            }
        }

        impl<F, $($T),*> sealed::Sealed<($($T,)*)> for F
        where
            F: Fn($(&$T),*) + Send + Sync + 'static,
            $($T: Send + Sync + 'static,)*
        {
        }

        impl<F, $($T),*> FreeFn<($($T,)*)> for F
        where
            F: Fn($(&$T),*) + Send + Sync + 'static,
            $($T: Send + Sync + 'static,)*
        {
            fn tag(&self) -> Result<HandlerTag> {
                let () = <F as FnShape<fn($(&$T),*)>>::CHECK;

                if let Some(pointer) = (self as &dyn Any).downcast_ref::<fn($(&$T),*)>() {
                    return Ok(HandlerTag::of_address(*pointer as usize));
                }
                if mem::size_of::<F>() == 0 {
                    return Ok(HandlerTag::of_function::<F>());
                }
                Err(ChannelError::NotAFunction(any::type_name::<F>()))
            }
        }

        impl<F, T, $($T),*> Method<T, ($($T,)*)> for F
        where
            F: Fn(&T, $(&$T),*) + Send + Sync + 'static,
            $($T: Send + Sync + 'static,)*
        {
            fn call(&self, target: &T, args: &($($T,)*)) {
                let ($($v,)*) = args;
                (self)(target, $($v),*)
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A0 a0);
impl_handlers!(A0 a0, A1 a1);
impl_handlers!(A0 a0, A1 a1, A2 a2);
impl_handlers!(A0 a0, A1 a1, A2 a2, A3 a3);
impl_handlers!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4);
impl_handlers!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_handlers!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_handlers!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);

type Invoke = dyn Fn(&Event) -> Result<()> + Send + Sync;

/// A registered subscription: its tag plus a closure that decodes an event
/// and calls the user's callback.
#[derive(Clone)]
pub struct Subscriber {
    tag: HandlerTag,
    invoke: Arc<Invoke>,
}

impl Subscriber {
    /// Wraps a plain callable.
    pub(crate) fn handler<A, H>(tag: HandlerTag, handler: H) -> Self
    where
        A: Args,
        H: Handler<A>,
    {
        Self {
            tag,
            invoke: Arc::new(move |event: &Event| {
                handler.call(event.decode::<A>()?);
                Ok(())
            }),
        }
    }

    /// Wraps a method bound to a target the subscriber keeps alive.
    pub(crate) fn method<T, A, M>(tag: HandlerTag, target: Arc<T>, method: M) -> Self
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        Self {
            tag,
            invoke: Arc::new(move |event: &Event| {
                method.call(&target, event.decode::<A>()?);
                Ok(())
            }),
        }
    }

    /// Wraps a method bound to a target the subscriber does not own.
    ///
    /// Once every strong owner is gone, invocations become silent no-ops.
    pub(crate) fn weak_method<T, A, M>(tag: HandlerTag, target: Weak<T>, method: M) -> Self
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        Self {
            tag,
            invoke: Arc::new(move |event: &Event| {
                if let Some(target) = target.upgrade() {
                    method.call(&target, event.decode::<A>()?);
                }
                Ok(())
            }),
        }
    }

    /// Returns this subscription's tag.
    pub fn tag(&self) -> HandlerTag {
        self.tag
    }

    /// Decodes `event` and runs the callback.
    ///
    /// Errors only when `event` carries a different argument list than the
    /// subscriber was registered for.
    pub fn call(&self, event: &Event) -> Result<()> {
        (self.invoke)(event)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("tag", &self.tag).finish()
    }
}
