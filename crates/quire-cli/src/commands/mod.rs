//! Command handlers

pub mod config;
pub mod index;
pub mod relocate;
pub mod reset;
pub mod status;
pub mod sync;
pub mod tags;
