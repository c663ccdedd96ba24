//! Open port inventory joined with process identity, plus guarded process
//! termination with an audit trail.
//!
//! The OS is reached only through [`host::HostOs`]; [`sys_host::SystemHost`]
//! is the real backend. A deterministic double, `fake_host::FakeHost`, is
//! built for tests and behind the `test-util` feature.

pub mod action_log;
pub mod api;
pub mod classify;
pub mod config;
pub mod enumerator;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake_host;
pub mod host;
pub mod state;
pub mod sys_host;
pub mod terminate;
pub mod types;
pub mod view;
pub mod ws;

pub use action_log::ActionLog;
pub use classify::{Classifier, OsFamily};
pub use host::HostOs;
pub use state::AppState;
pub use terminate::{TerminationPolicy, Terminator};
pub use view::build_view;
