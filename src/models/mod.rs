pub mod api;
pub mod dataset;
pub mod job;
