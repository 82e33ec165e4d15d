pub mod detoxify_client;

pub use detoxify_client::DetoxifyClient;
