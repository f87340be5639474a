//! agentvox: a local voice hub for coding agents.
//!
//! Agent activity arrives by HTTP push or by tailing agent transcripts,
//! and leaves as one ordered stream of short spoken summaries.

pub mod config;
pub mod hub;
