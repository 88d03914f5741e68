//! Debug artifact dumping: intermediate cycle products on disk.
//!
//! Layout is `<root>/<task_id>/<HHMMSS>_<step>.<ext>`. With the debug
//! flag off, only steps prefixed `final_` are written. Saving is fire and
//! forget — a full disk must never crash a cycle.

use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

/// Writes intermediate artifacts under a per-task directory.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    root: PathBuf,
    debug: bool,
}

impl DebugArtifacts {
    pub fn new(root: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            root: root.into(),
            debug,
        }
    }

    /// Save `content` for `step` of `task_id`. Gated on the debug flag
    /// unless the step name starts with `final_`.
    pub fn save(&self, task_id: &str, step: &str, content: &str, extension: &str) {
        let is_final = step.starts_with("final_");
        if !self.debug && !is_final {
            return;
        }
        if let Err(e) = self.try_save(task_id, step, content, extension) {
            warn!(task_id, step, error = %e, "failed to save debug artifact");
        }
    }

    fn try_save(
        &self,
        task_id: &str,
        step: &str,
        content: &str,
        extension: &str,
    ) -> std::io::Result<()> {
        let dir = self.root.join(task_id);
        std::fs::create_dir_all(&dir)?;
        let timestamp = Utc::now().format("%H%M%S");
        std::fs::write(dir.join(format!("{timestamp}_{step}.{extension}")), content)
    }
}
