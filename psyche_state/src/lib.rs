//! # Psyche State
//!
//! The canonical psychological and narrative state of a participant.
//! This crate is the single source of truth for tension, phase, narrative
//! weights and dynamic variables, and does not contain any generation logic.
//!
//! - **state**: the `PsychologicalState` data model and state transitions
//! - **store**: the `StateStore` that owns and mutates the state, with undo
//! - **signals**: the notification bridge used to announce state changes

pub mod error;
pub mod signals;
pub mod state;
pub mod store;

pub use error::*;
pub use signals::*;
pub use state::*;
pub use store::*;
