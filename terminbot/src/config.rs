use anyhow::{anyhow, Context, Result};
use std::{env, path::PathBuf};

pub const DEFAULT_LANG: &str = "en";
pub const DEFAULT_MENU_PATH: &str = "menu.yaml";
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_POLL_TIMEOUT: u64 = 30;
pub const MAX_POLL_TIMEOUT: u64 = 3600;

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub token: String,
    pub channel: Option<String>,
    pub default_lang: String,
    pub menu_path: PathBuf,
    pub api_url: String,
    pub poll_timeout: u64,
}

// Keeps the token out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("channel", &self.channel)
            .field("default_lang", &self.default_lang)
            .field("menu_path", &self.menu_path)
            .field("api_url", &self.api_url)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let token = var("TELEGRAM_TJBOT_TOKEN")
            .ok_or_else(|| anyhow!("TELEGRAM_TJBOT_TOKEN missing in environment"))?;

        let poll_timeout = match var("POLL_TIMEOUT") {
            Some(timeout) => timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("POLL_TIMEOUT must be a number of seconds, got {:?}", timeout))?,
            None => DEFAULT_POLL_TIMEOUT,
        };
        if poll_timeout > MAX_POLL_TIMEOUT {
            return Err(anyhow!(
                "POLL_TIMEOUT must be at most {} seconds, got {}",
                MAX_POLL_TIMEOUT,
                poll_timeout
            ));
        }

        Ok(Config {
            token,
            channel: var("CHANNEL"),
            default_lang: var("DEFAULT_LANG").unwrap_or_else(|| DEFAULT_LANG.into()),
            menu_path: var("MENU_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MENU_PATH)),
            api_url: var("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            poll_timeout,
        })
    }
}
