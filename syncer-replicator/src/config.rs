use anyhow::Context;
use syncer_config::environment::Environment;
use syncer_config::shared::SyncConfig;
use syncer_config::{load_config, load_config_for};

/// Loads and validates the sync configuration.
///
/// `local_testing` forces the `local` environment instead of reading `APP_ENVIRONMENT`.
pub fn load_sync_config(local_testing: bool) -> anyhow::Result<SyncConfig> {
    let config = if local_testing {
        load_config_for::<SyncConfig>(Environment::Local)
    } else {
        load_config::<SyncConfig>()
    }
    .context("failed to load the sync configuration")?;

    config
        .validate()
        .context("the sync configuration is invalid")?;

    Ok(config)
}
