//! Headless host
//!
//! Stands in for the game client when the bridge runs as a standalone
//! process: window content is checked against the addon directory instead of
//! being rendered, synthesized input is logged, and bound game binds come
//! from configuration.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, trace, warn};

use jsbridge_core::config::Config;
use jsbridge_core::{DirectoryKind, GameBind, Host, KeyCode, Modifiers, WindowKey, WindowSpec};

/// Host for addon origins of the form `https://<addon>.jsloader.local/`.
const ORIGIN_SUFFIX: &str = ".jsloader.local";

pub struct HeadlessHost {
    addons_dir: PathBuf,
    game_dir: Option<PathBuf>,
    bound: HashSet<GameBind>,
}

impl HeadlessHost {
    pub fn new(config: &Config) -> Self {
        let bound = config
            .gamebinds
            .bound
            .iter()
            .filter_map(|ordinal| GameBind::from_ordinal(*ordinal))
            .collect();
        Self {
            addons_dir: config.addons_dir(),
            game_dir: std::env::current_dir().ok(),
            bound,
        }
    }

    /// Map an addon-origin URL to the file it serves. `None` for URLs that
    /// are not addon-local.
    fn local_file(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix("https://")?;
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        let addon = host.strip_suffix(ORIGIN_SUFFIX)?;
        let path = path.split(['?', '#']).next().unwrap_or_default();
        Some(self.addons_dir.join(addon).join(path))
    }
}

/// A single path component that stays inside its parent.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn within(base: &Path, path: &Path) -> bool {
    match (base.canonicalize(), path.canonicalize()) {
        (Ok(base), Ok(path)) => path.starts_with(base),
        _ => false,
    }
}

impl Host for HeadlessHost {
    fn load_content(&self, spec: &WindowSpec) -> Result<(), String> {
        if let Some(file) = self.local_file(&spec.url) {
            if !file.is_file() || !within(&self.addons_dir, &file) {
                return Err(format!("{} does not resolve to an addon file", spec.url));
            }
        }
        info!(window = %spec.key, url = %spec.url, "content loaded");
        Ok(())
    }

    fn destroy_content(&self, key: &WindowKey) {
        debug!(window = %key, "content destroyed");
    }

    fn game_bind(&self, bind: GameBind, pressed: bool) {
        info!(%bind, pressed, "game bind");
    }

    fn forward_key(&self, key: KeyCode, modifiers: Modifiers, pressed: bool) {
        trace!(key = key.name(), ?modifiers, pressed, "key to game");
    }

    fn is_bound(&self, bind: GameBind) -> bool {
        self.bound.contains(&bind)
    }

    fn directory(&self, kind: DirectoryKind, name: Option<&str>) -> Option<PathBuf> {
        match kind {
            DirectoryKind::Game => self.game_dir.clone(),
            DirectoryKind::Addon => match name {
                Some(name) if is_plain_name(name) => Some(self.addons_dir.join(name)),
                Some(_) => None,
                None => Some(self.addons_dir.clone()),
            },
            DirectoryKind::Common => Some(self.addons_dir.join("common")),
        }
    }

    fn alert(&self, message: &str) {
        warn!("ALERT: {}", message);
    }
}
