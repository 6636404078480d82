//! Serial dispatcher: run closures one at a time, in order, on a single dedicated worker thread.
//!
//! ```
//! use serial_dispatch::Dispatcher;
//!
//! let dispatcher = Dispatcher::builder().start().unwrap();
//! let handle = dispatcher.handle();
//!
//! dispatcher.exec_async(|| println!("runs first")).unwrap();
//! let n = dispatcher.exec_sync(move || {
//!     // a sync call made from the worker itself runs in place
//!     handle.exec_sync(|| 100).unwrap() * 100
//! }).unwrap();
//! assert_eq!(n, 10_000);
//! ```
//!
//! See [`Dispatcher`] for the ordering, reentrancy, and lifecycle rules.

#[macro_use]
extern crate tracing;

mod dispatcher;
mod oneshot;
mod queue;
mod task;
mod worker;

pub use crate::{
    dispatcher::{Builder, Dispatcher, Handle},
    oneshot::api::ResultHandle,
};

/// Error types
pub mod error;
