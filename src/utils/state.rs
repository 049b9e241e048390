use std::path::Path;

use anyhow::{Context, Result};

use crate::core::module::Module;

/// Writes a module's tunable state to a JSON file in the
/// `{"parameters": …, "compiled": …}` shape.
pub fn save_program(module: &dyn Module, path: impl AsRef<Path>) -> Result<()> {
    let state = module.save_state();
    let encoded = serde_json::to_string_pretty(&state)?;
    std::fs::write(path.as_ref(), encoded)
        .with_context(|| format!("writing program state to {:?}", path.as_ref()))?;
    Ok(())
}

/// Restores a module's parameters from a JSON file written by
/// [`save_program`]. Unknown parameter names on either side are ignored.
pub fn load_program(module: &dyn Module, path: impl AsRef<Path>) -> Result<()> {
    let raw = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading program state from {:?}", path.as_ref()))?;
    let state = serde_json::from_str(&raw).context("parsing program state")?;
    module.load_state(&state);
    Ok(())
}
