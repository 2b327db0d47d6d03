//! CLI entry point. Nexagent has one job — start the gateway server — so
//! there are no subcommands, just overrides for the handful of settings an
//! operator might reach for without editing `config.toml`.

use clap::Parser;

/// Nexagent — conversational AI orchestration gateway.
#[derive(Debug, Parser)]
#[command(name = "nexagent", version, about)]
pub struct Cli {
    /// Override `server.host`.
    #[arg(long)]
    pub host: Option<String>,
    /// Override `server.port`.
    #[arg(long)]
    pub port: Option<u16>,
    /// Override `workspace.data_root`.
    #[arg(long)]
    pub data_root: Option<String>,
}

/// Load configuration from the path named by `NEXAGENT_CONFIG` (default
/// `config.toml`), falling back to built-in defaults when the file is
/// absent. Returns the parsed [`Config`](sa_domain::config::Config) and the
/// path that was consulted.
pub fn load_config() -> anyhow::Result<(sa_domain::config::Config, String)> {
    let config_path = std::env::var("NEXAGENT_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        sa_domain::config::Config::default()
    };

    Ok((config, config_path))
}

/// Apply CLI overrides on top of a loaded config, then environment variable
/// overrides (spec.md §6: `NEXAGENT_HOST`, `NEXAGENT_PORT`,
/// `NEXAGENT_DATA_ROOT`), CLI flags winning over both.
pub fn apply_overrides(mut config: sa_domain::config::Config, cli: &Cli) -> sa_domain::config::Config {
    if let Ok(host) = std::env::var("NEXAGENT_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("NEXAGENT_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(data_root) = std::env::var("NEXAGENT_DATA_ROOT") {
        config.workspace.data_root = data_root.into();
    }

    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref data_root) = cli.data_root {
        config.workspace.data_root = data_root.into();
    }

    config
}
