//! The bundled configuration file loads and matches the built-in defaults.

use std::collections::HashMap;
use std::path::Path;

use heat_reconciler::config::{ConfigManager, ReconcilerConfig, SequencingMode};

const BUNDLED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/heat-reconciler.toml");

#[test]
fn test_bundled_config_matches_defaults() {
    let manager = ConfigManager::load_with_overrides(Some(Path::new(BUNDLED)), HashMap::new())
        .expect("bundled config loads");
    assert_eq!(manager.config(), &ReconcilerConfig::default());
    assert_eq!(manager.source_file(), Some(Path::new(BUNDLED)));
}

#[test]
fn test_bundled_config_accepts_overrides() {
    let overrides = HashMap::from([
        (
            "HEAT_RECONCILER__SEQUENCING__MODE".to_string(),
            "independent_branches".to_string(),
        ),
        (
            "HEAT_RECONCILER__REQUEUE__RESYNC_READY_SECONDS".to_string(),
            "600".to_string(),
        ),
    ]);
    let manager = ConfigManager::load_with_overrides(Some(Path::new(BUNDLED)), overrides)
        .expect("overridden config loads");
    let config = manager.config();
    assert_eq!(config.sequencing.mode, SequencingMode::IndependentBranches);
    assert_eq!(config.requeue.resync_ready_seconds, Some(600));
}
