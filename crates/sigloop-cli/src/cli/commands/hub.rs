//! Hub command handler.

use anyhow::{Context, Result};
use sigloop_core::config::Config;
use sigloop_core::logging;

use crate::modes;

pub fn run(allow_concurrent_input: bool) -> Result<()> {
    let mut config = Config::load().context("load config")?;
    if allow_concurrent_input {
        config.input.concurrent_check = false;
    }

    // flushes the log file on drop
    let _guard = logging::init(&config.log).context("init logging")?;
    tracing::debug!(?config, "starting hub");

    modes::hub::run(&config)
}
