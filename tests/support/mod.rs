#![allow(dead_code, reason = "each test binary uses a different subset")]

use rstest::fixture;
use sketch_iq::{SketchConfig, SketchService};
use tempfile::TempDir;

pub use sketch_iq::tests::support::{
    approx_eq, blank_canvas, diagonal_canvas, png_bytes, square_canvas,
};

/// Service backed by a fresh snapshot inside a temporary directory.
pub struct Workspace {
    pub dir: TempDir,
    pub service: SketchService,
}

impl Workspace {
    pub fn config(&self) -> SketchConfig {
        config_in(&self.dir)
    }
}

pub fn config_in(dir: &TempDir) -> SketchConfig {
    SketchConfig {
        model_path: dir.path().join("model").join("sketch_iq.safetensors"),
        feedback_dir: dir.path().join("feedback"),
        initialise_missing_model: true,
        ..SketchConfig::default()
    }
}

/// Opens a service around a freshly initialised snapshot.
pub fn open_workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let service =
        SketchService::open(config_in(&dir)).unwrap_or_else(|e| panic!("open service: {e}"));
    Workspace { dir, service }
}

#[fixture]
pub fn workspace() -> Workspace {
    open_workspace()
}
