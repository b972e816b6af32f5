pub mod agent;
pub mod config_cmd;
pub mod doctor;
pub mod gateway;
pub mod onboard;
pub mod tools;
