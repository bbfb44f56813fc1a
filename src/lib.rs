pub mod app;
pub mod codes;
pub mod constants;
pub mod cycle;
pub mod directory;
pub mod errors;
pub mod game;
pub mod inbox;
pub mod registry;
pub mod store;
pub mod types;
