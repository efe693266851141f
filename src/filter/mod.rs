pub mod dsl;
pub mod translator;

pub use dsl::{Combine, FilterCondition, FilterDsl, FilterSpec};
pub use translator::{translate_filter, FilterFragment, FilterValidationError};
