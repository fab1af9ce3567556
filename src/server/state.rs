use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::DataDir;
use crate::db::Database;
use crate::job::JobRunner;

/// 应用状态
pub struct AppState {
    /// 单任务执行器
    pub runner: JobRunner,
    /// 数据目录
    pub data_dir: DataDir,
    /// 上传从检查任务状态到提交任务的整个过程持有此锁
    pub upload_lock: Mutex<()>,
}

impl AppState {
    pub fn new(runner: JobRunner, data_dir: DataDir) -> Arc<Self> {
        Arc::new(AppState { runner, data_dir, upload_lock: Mutex::new(()) })
    }

    pub fn db(&self) -> &Database {
        self.runner.pipeline().db()
    }
}
