// src/lib.rs

pub mod accounts;
pub mod eventbus;
pub mod orchestrator;
pub mod persistence;
pub mod restrictions;
pub mod scheduler;
pub mod session;
pub mod tasks;
pub mod victims;
pub mod web;
pub mod test_utils;

pub use titan_common::error::Error;
pub use titan_common::models;
pub use titan_common::traits;
