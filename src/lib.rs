pub mod audit;
pub mod config;
pub mod errors;
pub mod geometry;
pub mod logging;
pub mod monitor;
pub mod pickplace_config;
pub mod sequencer;
pub mod service;
pub mod sim;
pub mod ui;
