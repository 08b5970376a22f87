//! Configuration management commands

use std::path::Path;

use super::ConfigArgs;
use crate::config::Config;
use crate::error::BuilderError;

pub async fn execute(project: &Path, args: ConfigArgs) -> anyhow::Result<()> {
    if args.show {
        let config = Config::load(project).await?;
        println!("{}", toml::to_string_pretty(&config)?);
        if config.credential.is_none() {
            eprintln!(
                "note: {} is not set; `request` and `approve` will refuse to run",
                config.author.credential_env
            );
        }
        return Ok(());
    }

    if args.init {
        let path = Config::init_default(project).await?;
        println!("Configuration initialized at {}", path.display());
        return Ok(());
    }

    if let Some(kv) = args.set {
        let Some((key, value)) = kv.split_once('=') else {
            return Err(BuilderError::Config("invalid format; use --set key=value".into()).into());
        };
        Config::set(project, key.trim(), value).await?;
        println!("Set {} = {}", key.trim(), value.trim());
        return Ok(());
    }

    // Default: show help
    println!("Use --show, --init, or --set key=value");
    Ok(())
}
