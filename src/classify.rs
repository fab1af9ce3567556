use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use tokio::task::spawn_blocking;

use crate::db::{Database, crud};
use crate::error::DedupError;
use crate::job::{Progress, Stage};
use crate::metrics;

/// 外部图片分类器
///
/// 对同一个模型和同一张图片，结果应当是确定的
pub trait Classifier: Send + Sync {
    /// 返回预测的类别编号
    fn predict(&self, path: &Path) -> Result<i64>;
}

/// 通过外部命令调用分类器
///
/// 图片路径作为最后一个参数传入，标准输出的第一个字段解析为类别编号
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    /// 按空白切分命令行，第一段为程序名
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("分类器命令不能为空"))?;
        Ok(Self { program, args: parts.collect() })
    }
}

impl Classifier for CommandClassifier {
    fn predict(&self, path: &Path) -> Result<i64> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .with_context(|| format!("无法启动分类器: {}", self.program))?;
        if !output.status.success() {
            bail!(
                "分类器退出码 {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.split_whitespace().next().ok_or_else(|| anyhow!("分类器没有输出"))?;
        token.parse().with_context(|| format!("无法解析分类结果: {token}"))
    }
}

/// 对所有尚未标记的图片调用分类器，预测类别等于 `target_class` 的图片会被标记
///
/// 已标记的图片不会再次处理，重复运行只会处理剩下的图片。
/// 任意一张图片分类失败都会终止整个阶段。
pub async fn classify_images(
    db: &Database,
    classifier: Arc<dyn Classifier>,
    store: &Path,
    target_class: i64,
    progress: &Progress,
) -> Result<u64> {
    let start = Instant::now();
    let rows = crud::get_unclassified(db).await?;
    let total = rows.len() as u64;
    progress.set(Stage::Classify, 0, total, "分类");

    let mut marked = 0;
    for (i, row) in rows.iter().enumerate() {
        let path: PathBuf = store.join(&row.new_name);
        let classifier = classifier.clone();
        let predict_path = path.clone();
        let class = spawn_blocking(move || classifier.predict(&predict_path))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r)
            .map_err(|source| DedupError::ClassifierFailure { path, source })?;
        debug!("{} => {}", row.new_name, class);
        if class == target_class {
            crud::set_classified(db, row.id).await?;
            marked += 1;
        }
        progress.set(Stage::Classify, i as u64 + 1, total, &row.new_name);
    }

    metrics::inc_images_classified(marked);
    info!(
        "分类完成，共 {} 张图片，标记 {} 张，耗时 {:.2}s",
        total,
        marked,
        start.elapsed().as_secs_f32()
    );
    Ok(marked)
}
