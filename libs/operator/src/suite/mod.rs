pub mod controller;
pub mod cronjob;
pub mod finalizer;
pub mod reconcile;
pub mod validate;

pub use controller::{run, State};
