pub mod capability;
pub mod table;
pub mod types;
