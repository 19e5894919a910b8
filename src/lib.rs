pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gc;
pub mod isolator;
pub mod messages;
pub mod paths;
pub mod resources;
pub mod shutdown;
pub mod state;
pub mod updates;
