pub mod artifacts;
pub mod checkpoint;
pub mod detector;
pub mod engine;
pub mod fetch;
pub mod registry;
pub mod scheduler;
pub mod sweeper;
