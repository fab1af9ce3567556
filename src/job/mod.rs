mod pipeline;
mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub use self::pipeline::*;
pub use self::state::*;
use crate::error::JobError;

/// 单任务执行器
///
/// 同一时间最多只有一个任务在运行，任务运行期间提交的新任务会被直接拒绝，不会排队。
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    progress: Progress,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline: Arc::new(pipeline), progress: Progress::new(), active: Mutex::new(None) }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn snapshot(&self) -> JobState {
        self.progress.snapshot()
    }

    pub fn is_running(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// 提交一个任务，必须在 tokio 运行时中调用
    pub fn submit(&self, archives: Vec<PathBuf>) -> Result<(), JobError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(JobError::Busy);
        }

        info!("开始新任务，共 {} 个归档", archives.len());
        self.progress.start(archives.len() as u64);
        let pipeline = self.pipeline.clone();
        let progress = self.progress.clone();
        *active = Some(tokio::spawn(async move {
            pipeline.run(&archives, &progress).await;
        }));
        Ok(())
    }

    /// 等待当前任务结束，没有任务时立即返回
    pub async fn wait(&self) {
        while self.is_running() {
            sleep(Duration::from_millis(50)).await;
        }
    }
}
