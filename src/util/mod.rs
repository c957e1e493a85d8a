pub mod config;
pub mod dates;
pub mod logging;
pub mod version;
