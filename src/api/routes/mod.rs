//! API route handlers

pub mod health;
pub mod list;
pub mod update;
pub mod value;
