//! Data Narrative: deterministic narration of tabular sensor data.
//!
//! Turns rows of channel readings into an ordered list of narrative lines
//! through a fixed pipeline: table parsing, symbolic state derivation,
//! regime classification, beat planning under token constraints, bridge
//! and side-quest steering, and surface lookup. No randomness: the same
//! table and configuration always give the same lines.

pub mod core;
pub mod schema;
pub mod story_data;
