pub mod error;
pub mod models;
pub mod selector;
pub mod settings;
