pub mod circuit_breaker;
pub mod filter_parser;
pub mod router;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use filter_parser::FilterParser;
pub use router::{QueryRouter, RouteInput, RouteMethod, RoutingDecision, Strategy};
