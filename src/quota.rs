use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// 额度检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub message: String,
}

/// 额度检查接口
///
/// 提取开始前以预计图片总数调用一次 `check`，之后每处理完一个归档以 0 调用一次，
/// 检查累计用量是否已经超限。
pub trait QuotaCheck: Send + Sync {
    fn check(&self, additional: u64) -> QuotaDecision;

    /// 记录新登记的图片数量
    fn record(&self, _images: u64) -> Result<()> {
        Ok(())
    }

    /// 任务成功结束
    fn finish_run(&self) -> Result<()> {
        Ok(())
    }
}

/// 不限制额度
pub struct Unlimited;

impl QuotaCheck for Unlimited {
    fn check(&self, _additional: u64) -> QuotaDecision {
        QuotaDecision { allowed: true, message: String::new() }
    }
}

/// 用量记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// 允许处理的图片总数，为空时不限制
    #[serde(default)]
    pub total_images_allowed: Option<u64>,
    /// 已处理的图片总数
    #[serde(default)]
    pub total_images_processed: u64,
    /// 成功完成的任务次数
    #[serde(default)]
    pub runs: u64,
}

/// 保存在 JSON 文件中的用量账本
pub struct UsageLedger {
    path: PathBuf,
    usage: Mutex<Usage>,
}

impl UsageLedger {
    /// 打开用量账本，文件不存在或无法解析时从零开始
    ///
    /// `limit` 不为空时覆盖文件中的额度并立即保存
    pub fn open(path: impl AsRef<Path>, limit: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let usage = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("用量文件无法解析，重新计数: {e}");
                Usage::default()
            }),
            Err(_) => Usage::default(),
        };
        let ledger = Self { path, usage: Mutex::new(usage) };
        if let Some(limit) = limit {
            ledger.update(|usage| usage.total_images_allowed = Some(limit))?;
        }
        Ok(ledger)
    }

    pub fn usage(&self) -> Usage {
        self.usage.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut Usage)) -> Result<()> {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut usage);
        self.save(&usage)
    }

    fn save(&self, usage: &Usage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(usage)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("写入用量文件失败: {}", self.path.display()))
    }
}

impl QuotaCheck for UsageLedger {
    fn check(&self, additional: u64) -> QuotaDecision {
        let usage = self.usage();
        match usage.total_images_allowed {
            None => QuotaDecision { allowed: true, message: String::new() },
            Some(limit) => {
                let projected = usage.total_images_processed + additional;
                QuotaDecision {
                    allowed: projected <= limit,
                    message: format!(
                        "已使用 {} 张，本次预计 {} 张，额度 {} 张",
                        usage.total_images_processed, additional, limit
                    ),
                }
            }
        }
    }

    fn record(&self, images: u64) -> Result<()> {
        self.update(|usage| usage.total_images_processed += images)
    }

    fn finish_run(&self) -> Result<()> {
        self.update(|usage| usage.runs += 1)?;
        info!("累计处理图片 {} 张", self.usage().total_images_processed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_by_default() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = UsageLedger::open(dir.path().join("usage.json"), None)?;
        assert!(ledger.check(1_000_000).allowed);
        Ok(())
    }

    #[test]
    fn test_limit_and_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("usage.json");
        let ledger = UsageLedger::open(&path, Some(10))?;
        assert!(ledger.check(10).allowed);
        assert!(!ledger.check(11).allowed);

        ledger.record(8)?;
        assert!(ledger.check(2).allowed);
        assert!(!ledger.check(3).allowed);
        ledger.record(3)?;
        assert!(!ledger.check(0).allowed);

        // 重新打开后用量仍然保留
        let reopened = UsageLedger::open(&path, None)?;
        assert_eq!(reopened.usage().total_images_processed, 11);
        assert_eq!(reopened.usage().total_images_allowed, Some(10));
        Ok(())
    }

    #[test]
    fn test_corrupted_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("usage.json");
        std::fs::write(&path, "{ not json")?;
        let ledger = UsageLedger::open(&path, None)?;
        assert_eq!(ledger.usage(), Usage::default());
        Ok(())
    }
}
