pub mod config;
pub mod constants;
pub mod socket;
pub mod users;
