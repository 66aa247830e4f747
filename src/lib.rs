pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod session;
pub mod shell;

pub use session::Session;
