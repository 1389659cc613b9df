pub mod status_updater;
pub mod watchdog;

pub use status_updater::StatusUpdater;
pub use watchdog::DeadlineWatchdog;
