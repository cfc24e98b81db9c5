pub mod config;
pub mod plugin;

pub use config::GwscanConfig;
pub use plugin::OracleLoader;
