pub mod accounts;
pub mod registry;
pub mod resources;
pub mod settings;
