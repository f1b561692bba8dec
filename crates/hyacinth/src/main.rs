use std::sync::Arc;

use hyacinth_core::{
    config::Config,
    plugins::{builtin_plugins, PluginSettings},
    store::JsonStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hyacinth_core::logging::init("hyacinth")?;

    let cfg = Arc::new(Config::load()?);

    let plugins = builtin_plugins()?.build(
        &PluginSettings {
            scrape_timeout: cfg.scrape_timeout,
        },
        &cfg.plugins,
    )?;
    for (path, name) in plugins.loaded() {
        tracing::info!(plugin = name, path, "plugin loaded");
    }

    let store = Arc::new(JsonStore::open(cfg.data_dir.clone()).await?);

    hyacinth_telegram::router::run_polling(cfg, Arc::new(plugins), store)
        .await
        .map_err(|e| anyhow::anyhow!("telegram bot failed: {e}"))?;

    Ok(())
}
