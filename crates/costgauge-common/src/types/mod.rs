//! Core data types for costgauge

pub mod cost_record;
pub mod date_range;
pub mod window;
