pub mod admission;
pub mod config;
pub mod health;
