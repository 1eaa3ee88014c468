pub mod excel;
pub mod file_store;
pub mod uploads;
