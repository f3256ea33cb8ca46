use anyhow::{Context, Result};
use log::{info, warn};
use std::env;

use bot::TerminBot;
use config::Config;
use loader::MenuLoader;
use telegram::TelegramClient;

mod bot;
mod config;
mod keyboard;
mod loader;
mod menu;
mod telegram;

fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err).context("could not load .env");
        }
    }

    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&env::var("LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    info!("starting with {:?}", config);
    if config.channel.is_none() {
        warn!("CHANNEL is not set, the root menu has no notify button");
    }

    let menu = MenuLoader::from_path(&config.menu_path, &config.default_lang)?;
    info!(
        "loaded {} menu entries from {:?} (language {})",
        menu.roots().len(),
        config.menu_path,
        menu.language().unwrap_or("-")
    );

    let client = TelegramClient::new(&config.api_url, &config.token, config.poll_timeout)?;
    let mut bot = TerminBot::new(client, menu, config.channel, config.poll_timeout);
    bot.run()
}
