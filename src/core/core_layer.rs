// The core module contains all moderation logic.
// No HTTP clients or broker implementations live here, only traits (ports).

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "routing/mod.rs"]
pub mod routing;

#[path = "stages/mod.rs"]
pub mod stages;
