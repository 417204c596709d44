pub mod backup_exchange;
pub mod core;
pub mod grades;
pub mod performance;
pub mod students;
pub mod subjects;
pub mod terms;
