//! Domain layer - Snapshot model and port definitions
//!
//! This module defines the backup/volume model and the core traits (ports)
//! that adapters implement, following hexagonal architecture principles.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
