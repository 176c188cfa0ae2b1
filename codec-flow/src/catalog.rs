//! Scene name to raw video / checkpoint lookup.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::AppConfig;

/// File names for one known scene.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SceneFiles {
    raw_file: &'static str,
    model_file: &'static str,
}

/// Resolved paths for one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenePaths {
    pub raw_path: PathBuf,
    pub model_path: PathBuf,
}

const BUILTIN_SCENES: &[(&str, &str, &str)] = &[
    (
        "sample_1080p30",
        "sample_1080p30.mp4",
        "timestamp_sparse_codec_test1-epoch=49-val_loss=0.008321.ckpt",
    ),
    (
        "snow_road",
        "snow_road.mkv",
        "timestamp_sparse_codec_snow_road-epoch=41-val_loss=0.005177.ckpt",
    ),
    (
        "lot",
        "lot.mkv",
        "timestamp_sparse_codec_lot-epoch=44-val_loss=0.001449.ckpt",
    ),
    (
        "lot_snow",
        "lot_snow.mkv",
        "timestamp_sparse_codec_lot_snow-epoch=49-val_loss=0.003937.ckpt",
    ),
    (
        "simple_road",
        "simple_road.mkv",
        "timestamp_sparse_codec_simple_road-epoch=32-val_loss=0.000993.ckpt",
    ),
    (
        "night_rainy_drive",
        "night_rainy_drive.mp4",
        "timestamp_sparse_codec_night_rainy_drive-epoch=48-val_loss=0.022807.ckpt",
    ),
    (
        "slow_speed_rear_bump",
        "slow_speed_rear_bump.mp4",
        "timestamp_sparse_codec_night_slow_speed_rear_bump-epoch=47-val_loss=0.013381.ckpt",
    ),
];

/// Catalog of scenes the codec has checkpoints for.
#[derive(Debug, Clone)]
pub struct SceneCatalog {
    raw_dir: PathBuf,
    model_dir: PathBuf,
    scenes: HashMap<&'static str, SceneFiles>,
}

impl SceneCatalog {
    /// Built-in scene table rooted at the given directories.
    pub fn builtin(raw_dir: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        let scenes = BUILTIN_SCENES
            .iter()
            .map(|&(name, raw_file, model_file)| {
                (
                    name,
                    SceneFiles {
                        raw_file,
                        model_file,
                    },
                )
            })
            .collect();

        Self {
            raw_dir: raw_dir.into(),
            model_dir: model_dir.into(),
            scenes,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::builtin(&config.raw_video_dir, &config.model_dir)
    }

    /// Resolve a scene name to its raw video and checkpoint paths.
    pub fn resolve(&self, scene: &str) -> Option<ScenePaths> {
        self.scenes.get(scene).map(|files| ScenePaths {
            raw_path: self.raw_dir.join(files.raw_file),
            model_path: self.model_dir.join(files.model_file),
        })
    }

    pub fn contains(&self, scene: &str) -> bool {
        self.scenes.contains_key(scene)
    }

    /// Known scene names, sorted.
    pub fn scene_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.scenes.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_scene() {
        let catalog = SceneCatalog::builtin("/raw", "/models");
        let paths = catalog.resolve("simple_road").unwrap();

        assert_eq!(paths.raw_path, PathBuf::from("/raw/simple_road.mkv"));
        assert_eq!(
            paths.model_path,
            PathBuf::from("/models/timestamp_sparse_codec_simple_road-epoch=32-val_loss=0.000993.ckpt")
        );
    }

    #[test]
    fn test_resolve_unknown_scene() {
        let catalog = SceneCatalog::builtin("/raw", "/models");
        assert!(catalog.resolve("does_not_exist").is_none());
        assert!(!catalog.contains(""));
        assert_eq!(catalog.scene_names().len(), BUILTIN_SCENES.len());
    }
}
