pub mod backend;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod golden;
pub mod matrix;
pub mod report;
pub mod types;
