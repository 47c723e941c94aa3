//! Core domain models for flowline
//!
//! This module defines the fundamental data structures that represent
//! workflows, jobs, steps, and their configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod matrix;
pub mod state;
pub mod step;
pub mod template;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use error::FlowError;
pub use job::*;
pub use matrix::{Matrix, MatrixAxis};
pub use state::*;
pub use step::*;
pub use trigger::{Event, EventKind, Trigger};
pub use workflow::*;
