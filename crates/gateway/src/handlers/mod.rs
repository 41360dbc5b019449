//! API handlers module

pub mod ask;
pub mod catalog;
pub mod health;
pub mod stats;
