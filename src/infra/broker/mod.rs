pub mod in_memory_broker;

pub use in_memory_broker::InMemoryBroker;
#[cfg(test)]
pub use in_memory_broker::Settlement;
