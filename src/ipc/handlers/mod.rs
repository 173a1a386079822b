pub mod backup;
pub mod core;
pub mod payments;
pub mod plans;
pub mod sessions;
pub mod setup;
pub mod students;
