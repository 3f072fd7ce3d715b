//! Rebuilds activity sessions from a log of stage events.
//!
//! The heart of the crate is [`projections::extract`], a pure function from
//! an event table and an activity type to a session table. The remaining
//! modules read raw batches, keep the processing log, write the warehouse
//! tables and serve everything over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod generator;
pub mod models;
pub mod pipeline;
pub mod projections;
pub mod source;
pub mod warehouse;

pub use error::{ExtractError, IngestError};
pub use models::{ActivityType, Event, Session, SessionTable};
pub use projections::extract;
