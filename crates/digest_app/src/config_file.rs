use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use digest_core::EngineConfig;
use engine_logging::engine_info;

/// Read a configuration file. `.json` files are parsed as JSON, anything
/// else as RON.
pub(crate) fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))?;
    let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON configuration {}", path.display()))?,
        _ => ron::from_str(&text)
            .with_context(|| format!("invalid RON configuration {}", path.display()))?,
    };
    engine_info!(
        "loaded {} tasks from {}",
        config.tasks.len(),
        path.display()
    );
    Ok(config)
}

/// Keep only the tasks named in `only`, in configuration order.
pub(crate) fn select_tasks(mut config: EngineConfig, only: &[String]) -> Result<EngineConfig> {
    if only.is_empty() {
        return Ok(config);
    }
    if let Some(unknown) = only
        .iter()
        .find(|name| !config.tasks.iter().any(|t| &t.name == *name))
    {
        bail!("no task named {unknown:?} in configuration");
    }
    config.tasks.retain(|t| only.contains(&t.name));
    Ok(config)
}
