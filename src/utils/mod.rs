//! The `utils` module provides the pieces shared by every other module of
//! `mchat`: the error taxonomy and logging initialization.

pub mod error;
pub mod logging;
