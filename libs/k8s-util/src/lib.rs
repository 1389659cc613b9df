pub mod client;
pub mod metrics;
pub mod url;

pub use client::new_client_with_metrics;
