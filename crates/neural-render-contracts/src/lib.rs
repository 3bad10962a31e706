pub mod events;
pub mod models;
pub mod output;
pub mod settings;
