//! Session lifecycle.
//!
//! | Module     | Purpose                                                   |
//! |------------|-----------------------------------------------------------|
//! | `machine`  | Validated state transitions for one session               |
//! | `registry` | Concurrent store, one active session per client, reaper   |
//! | `driver`   | Async task feeding transport events into the registry     |

pub mod driver;
pub mod machine;
pub mod registry;

pub use driver::{DriverDeps, SessionDriver};
pub use machine::{FailureKind, SessionEvent, SessionMachine, Transition};
pub use registry::{ReapReport, SessionRegistry};
