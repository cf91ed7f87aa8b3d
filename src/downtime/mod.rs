pub mod actor;
pub mod controller;

pub use actor::DowntimeActor;
