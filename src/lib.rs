pub mod client;
pub mod config;
pub mod constants;
pub mod entity;
pub mod error;
pub mod interaction;
pub mod level;
pub mod perception;
pub mod protocol;
pub mod registry;
pub mod replica;
pub mod rng;
pub mod server;
pub mod terrain;
pub mod tick;
pub mod types;
pub mod world;
