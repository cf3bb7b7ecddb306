use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio::fs;

use crate::config::BridgeConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file, then environment overrides)
    Show,

    /// Validate the configuration file and the effective values
    Validate,

    /// Print the configuration file path
    Path,
}

pub async fn cmd_config(args: ConfigArgs, config: &BridgeConfig, path: &Path) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            println!("Current configuration ({}):", path.display());
            println!("{}", serde_yaml::to_string(config)?);
        }
        ConfigAction::Validate => {
            if fs::try_exists(path).await? {
                let raw = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str::<BridgeConfig>(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
            }
            config
                .validate()
                .with_context(|| format!("validating {}", path.display()))?;
            println!("Configuration {} is valid", path.display());
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn validate_rejects_unparsable_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map]").unwrap();
        let args = ConfigArgs {
            action: ConfigAction::Validate,
        };
        let err = cmd_config(args, &BridgeConfig::default(), file.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[tokio::test]
    async fn validate_rejects_short_caller_timeout() {
        let mut config = BridgeConfig::default();
        config.server.caller_timeout_secs = 1;
        let args = ConfigArgs {
            action: ConfigAction::Validate,
        };
        let missing = Path::new("/nonexistent/webchat-bridge/config.yaml");
        assert!(cmd_config(args, &config, missing).await.is_err());
    }
}
