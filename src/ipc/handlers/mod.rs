pub mod assignments;
pub mod attendance;
pub mod core;
pub mod dashboard;
pub mod import;
pub mod reports;
pub mod schedule;
pub mod students;
