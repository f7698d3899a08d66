pub mod commands;
pub mod config;
pub mod console;
pub mod db;
pub mod scripting;
pub mod state;

pub use console::run;
