// The infra module contains implementations of core traits.
// Each external collaborator gets its own submodule.

#[path = "broker/mod.rs"]
pub mod broker;

#[path = "detoxify/mod.rs"]
pub mod detoxify;

#[path = "reachability/mod.rs"]
pub mod reachability;
