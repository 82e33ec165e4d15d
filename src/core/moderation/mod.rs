// Core moderation module - verdicts, classification and the stage contract.

pub mod evaluators;
pub mod moderation_models;
pub mod stage;
pub mod status;
pub mod thresholds;

pub use evaluators::*;
pub use moderation_models::*;
pub use stage::*;
pub use status::*;
pub use thresholds::*;
