// Worker layer - drives the core from broker deliveries.
// Like an adapter layer: it knows about queues and tasks, the core does not.

#[path = "pipeline_context.rs"]
pub mod pipeline_context;

#[path = "stage_consumer.rs"]
pub mod stage_consumer;

#[path = "supervisor.rs"]
pub mod supervisor;

#[cfg(test)]
#[path = "test_support.rs"]
pub mod test_support;

pub use pipeline_context::PipelineError;
pub use supervisor::{PipelineSupervisor, RunningPipeline};
