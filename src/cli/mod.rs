pub mod config;
pub mod serve;

pub use config::{cmd_config, ConfigAction, ConfigArgs};
pub use serve::{cmd_serve, ServeArgs};
