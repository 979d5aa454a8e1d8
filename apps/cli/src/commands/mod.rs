//! Command implementations for the Segmask CLI.

pub mod check;
pub mod config;
pub mod submit;
