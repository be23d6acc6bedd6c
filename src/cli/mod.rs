// CLI module for blobgate
// Author: kelexine (https://github.com/kelexine)

use crate::config::AppConfig;
use clap::Parser;
use std::path::PathBuf;

/// blobgate - Caching gateway for content-addressed blob storage
#[derive(Parser, Debug)]
#[command(name = "blobgate", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.blobgate/config.toml when present)
    #[arg(short, long, env = "BLOBGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["blobgate", "--config", "/etc/blobgate.toml", "-p", "9000", "--check-config"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/blobgate.toml")));
        assert_eq!(args.port, Some(9000));
        assert!(args.check_config);
    }

    #[test]
    fn test_port_override() {
        let args = Args::try_parse_from(["blobgate", "--port", "8088"]).unwrap();
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 8088);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Args::try_parse_from(["blobgate", "--port", "99999"]).is_err());
    }
}
