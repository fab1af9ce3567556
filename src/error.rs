use std::path::PathBuf;

use thiserror::Error;

use crate::hamming::HashLengthMismatch;

/// 任务执行中需要区分处理的错误
///
/// 其余错误统一通过 `anyhow` 携带上下文向上传递，由任务调度方转为错误状态。
#[derive(Debug, Error)]
pub enum DedupError {
    /// 额度检查未通过，终止任务，已完成的部分不回滚
    #[error("额度不足: {0}")]
    QuotaExceeded(String),
    /// 分类器调用失败，终止整个分类阶段
    #[error("分类失败: {}", path.display())]
    ClassifierFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// 整个归档无法读取
    #[error("读取归档失败: {}", path.display())]
    ArchiveDecodeFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// 导出结果时写入文件失败
    #[error("导出失败: {}", path.display())]
    ExportIoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    HashLength(#[from] HashLengthMismatch),
}

/// 提交任务时的错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("已有任务在运行，请稍后再试")]
    Busy,
}
