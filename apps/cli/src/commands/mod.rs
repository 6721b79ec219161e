//! Command implementations for the Oncotext CLI.

pub mod eval;
pub mod events;
pub mod latest;
pub mod promote;
