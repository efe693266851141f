pub mod error;
pub mod sanitize;
