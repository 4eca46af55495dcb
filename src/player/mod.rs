pub mod commands;
pub mod controller;
pub mod state;
pub mod thread;
pub mod time;
