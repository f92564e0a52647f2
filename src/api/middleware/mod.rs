//! Request/response middleware

pub mod envelope;
pub mod subnet;
