//! Interception of the data-access surface.
//!
//! [`intercept`] wraps a [`RawCollection`](crate::backend::RawCollection) once.
//! Each operation has a fixed shape ([`Operation::arity`], whether it takes a
//! callback), so dispatch never guesses from argument counts at call time.

mod args;
mod collection;
mod operation;

pub use args::{Arg, Callback};
pub use collection::{intercept, InterceptedCollection};
pub use operation::{Arity, Operation, Params};
