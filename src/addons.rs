//! Addon discovery
//!
//! Every subdirectory of the addons directory holding a `manifest.json` is an
//! addon. Subdirectories without one (such as `common/`) are not addons and
//! are skipped quietly; broken manifests are skipped with a warning.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use jsbridge_core::addon::MANIFEST_FILE;
use jsbridge_core::AddonManifest;

pub fn discover(dir: &Path) -> Result<Vec<AddonManifest>> {
    if !dir.is_dir() {
        debug!("Addons directory {:?} does not exist", dir);
        return Ok(Vec::new());
    }

    let mut manifests = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read addons directory: {dir:?}"))?
    {
        let path = entry?.path();
        if !path.join(MANIFEST_FILE).is_file() {
            continue;
        }
        match AddonManifest::load(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!("Skipping addon at {:?}: {}", path, e),
        }
    }

    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(manifests)
}
