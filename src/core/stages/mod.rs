// Concrete moderation stages. Each one plugs an evaluator port into the
// shared stage contract.

pub mod text_toxicity;
pub mod text_utils;
pub mod url_validation;

pub use text_toxicity::TextToxicityStage;
pub use url_validation::UrlValidationStage;
