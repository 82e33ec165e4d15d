// Routing - broker port, stage registry and next-hop resolution.

pub mod broker;
pub mod registry;

pub use broker::*;
pub use registry::*;
