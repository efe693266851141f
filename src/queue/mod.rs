pub mod coordinator;
pub mod task_queue;

pub use coordinator::EnrichmentCoordinator;
pub use task_queue::{ClaimedTask, EnrichmentResult, TaskQueue};
