//! # Narrative Core (The Cortex)
//!
//! The "brain" of the adaptive narrative loop. This crate measures how
//! delivered content lands, adapts the narrative through configurable rules,
//! and schedules rate-limited content generation whose results feed back
//! into the same measurements.
//!
//! ## Core Components
//!
//! - **metrics**: Decaying metrics, cross-metric correlation and adaptation rules
//! - **intent**: Prioritized, validated, rate-limited generation requests
//! - **context_assembler**: Builds the context handed to the generation service
//! - **director**: Owns the tick loop and is the single writer of all state
//! - **events**: Feedback events fed into the metric engine
//!
//! ## Design Philosophy
//!
//! - **Closed Loop**: Generated content is scored and absorbed back into the metrics that requested it
//! - **Explicit Time**: Everything advances through `tick(dt)`; nothing reads a wall clock except the scheduler's rate limit
//! - **Injected Collaborators**: Profile, generation, validation and scoring sit behind traits

pub mod config;
pub mod context_assembler;
pub mod director;
pub mod error;
pub mod events;
pub mod intent;
pub mod metrics;
pub mod profile;

pub use config::*;
pub use context_assembler::*;
pub use director::*;
pub use error::*;
pub use events::*;
pub use intent::*;
pub use metrics::*;
pub use profile::*;
