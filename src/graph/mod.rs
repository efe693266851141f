pub mod backend;
pub mod types;

pub use backend::GraphBackend;
pub use types::*;
