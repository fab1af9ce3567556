use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use utoipa::ToSchema;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// 任务所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// 解压归档并计算哈希
    Extract,
    /// 调用分类器
    Classify,
    /// 比对、聚类与导出
    Dedup,
    None,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extract => "extract",
            Self::Classify => "classify",
            Self::Dedup => "dedup",
            Self::None => "none",
        })
    }
}

/// 任务进度，`current` 和 `total` 均相对于当前阶段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobState {
    pub status: JobStatus,
    pub stage: Stage,
    pub current: u64,
    pub total: u64,
    pub detail: String,
    pub error: Option<String>,
    /// 任务成功结束时本次找到的重复组数
    pub groups: Option<u64>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Idle,
            stage: Stage::None,
            current: 0,
            total: 0,
            detail: String::new(),
            error: None,
            groups: None,
        }
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Error)
    }

    /// 进度百分比，范围 0 到 100
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.current.min(self.total) * 100 / self.total) as u8
    }
}

/// 全局唯一的任务进度
///
/// 只有正在运行的任务会修改它，所有字段在同一把锁内一起更新，
/// 读取方拿到的快照不会出现字段之间不一致的情况。
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<Mutex<JobState>>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取当前进度的副本
    pub fn snapshot(&self) -> JobState {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut JobState)) {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
    }

    /// 重置进度并进入运行状态
    pub fn start(&self, archives: u64) {
        self.update(|state| {
            *state = JobState {
                status: JobStatus::Running,
                stage: Stage::Extract,
                total: archives,
                ..JobState::default()
            }
        });
    }

    pub fn set(&self, stage: Stage, current: u64, total: u64, detail: impl Into<String>) {
        let detail = detail.into();
        self.update(|state| {
            state.stage = stage;
            state.current = current;
            state.total = total;
            state.detail = detail;
        });
    }

    /// 当前阶段的计数增加 `delta`，可以从多个线程同时调用
    pub fn advance(&self, delta: u64) {
        self.update(|state| state.current += delta);
    }

    pub fn finish(&self, groups: u64) {
        self.update(|state| {
            *state = JobState {
                status: JobStatus::Done,
                detail: format!("找到 {groups} 组重复图片"),
                groups: Some(groups),
                ..JobState::default()
            };
        });
    }

    /// 进入错误状态，保留出错时的阶段和计数
    pub fn fail(&self, error: &anyhow::Error) {
        let message = format!("{error:#}");
        self.update(|state| {
            state.status = JobStatus::Error;
            state.detail = message.clone();
            state.error = Some(message);
        });
    }
}
