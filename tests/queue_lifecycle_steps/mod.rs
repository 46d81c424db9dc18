//! Step definitions for queue lifecycle scenarios.

pub mod given;
pub mod when;
