use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub phase: String,
    pub records: Option<u64>,
    pub bytes_uploaded: Option<u64>,
    pub bytes_downloaded: Option<u64>,
}

impl TaskProgress {
    pub fn phase(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            ..Self::default()
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: TaskProgress);
}
