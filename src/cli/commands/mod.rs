//! Command implementations.

pub mod export;
pub mod plan;
pub mod state;
