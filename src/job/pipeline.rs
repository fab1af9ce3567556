use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{error, info};
use tokio::task::spawn_blocking;

use super::{Progress, Stage};
use crate::classify::{Classifier, CommandClassifier, classify_images};
use crate::cluster::{DuplicateGroup, find_groups};
use crate::config::{DataDir, PipelineOptions};
use crate::db::{Database, crud, init_db};
use crate::error::DedupError;
use crate::export::Exporter;
use crate::graph::{Node, SimilarityGraph, comparison_count};
use crate::ingest::Ingester;
use crate::metrics;
use crate::quota::{QuotaCheck, Unlimited, UsageLedger};

fn decode_failure(path: &Path) -> impl FnOnce(anyhow::Error) -> DedupError {
    let path = path.to_path_buf();
    move |source| DedupError::ArchiveDecodeFailure { path, source }
}

/// 一次查重任务的全部流程：解压、分类、比对与导出
pub struct Pipeline {
    db: Database,
    ingester: Ingester,
    classifier: Arc<dyn Classifier>,
    quota: Arc<dyn QuotaCheck>,
    exporter: Exporter,
    target_class: i64,
    threshold: u32,
}

impl Pipeline {
    /// 默认不限额度，目标类别为 1，距离阈值为 5
    pub fn new(
        db: Database,
        data_dir: &DataDir,
        ingester: Ingester,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            db,
            ingester,
            classifier,
            quota: Arc::new(Unlimited),
            exporter: Exporter::new(data_dir.images(), data_dir.output(), data_dir.manifest()),
            target_class: 1,
            threshold: 5,
        }
    }

    /// 按命令行参数打开数据目录并创建任务流程
    pub async fn open(data_dir: &DataDir, opts: &PipelineOptions) -> Result<Self> {
        data_dir.prepare()?;
        let db = init_db(data_dir.database()).await?;
        let ingester = Ingester::new(data_dir.images(), opts.hash_size, &opts.suffix)?;
        let classifier = Arc::new(CommandClassifier::parse(&opts.classifier)?);
        let ledger = UsageLedger::open(data_dir.usage(), opts.max_images)?;

        Ok(Self::new(db, data_dir, ingester, classifier)
            .quota(Arc::new(ledger))
            .target_class(opts.target_class)
            .threshold(opts.threshold))
    }

    pub fn quota(mut self, quota: Arc<dyn QuotaCheck>) -> Self {
        self.quota = quota;
        self
    }

    pub fn target_class(mut self, target_class: i64) -> Self {
        self.target_class = target_class;
        self
    }

    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// 执行任务并把结果写入进度，不返回错误
    pub async fn run(&self, archives: &[PathBuf], progress: &Progress) {
        let start = Instant::now();
        match self.execute(archives, progress).await {
            Ok(groups) => {
                progress.finish(groups.len() as u64);
                metrics::inc_job("done");
                info!(
                    "任务完成，找到 {} 组重复图片，总耗时 {:.2}s",
                    groups.len(),
                    start.elapsed().as_secs_f32()
                );
            }
            Err(e) => {
                progress.fail(&e);
                metrics::inc_job("error");
                error!("任务失败: {e:#}");
            }
        }
    }

    /// 依次执行各个阶段，任一阶段出错即终止，已写入的数据不会回滚
    pub async fn execute(
        &self,
        archives: &[PathBuf],
        progress: &Progress,
    ) -> Result<Vec<DuplicateGroup>> {
        self.extract(archives, progress).await?;
        classify_images(
            &self.db,
            self.classifier.clone(),
            self.ingester.store(),
            self.target_class,
            progress,
        )
        .await?;
        let groups = self.dedup(progress).await?;
        self.quota.finish_run()?;
        Ok(groups)
    }

    fn check_quota(&self, additional: u64) -> Result<(), DedupError> {
        let decision = self.quota.check(additional);
        if decision.allowed {
            Ok(())
        } else {
            Err(DedupError::QuotaExceeded(decision.message))
        }
    }

    async fn extract(&self, archives: &[PathBuf], progress: &Progress) -> Result<u64> {
        let start = Instant::now();
        let mut projected = 0;
        for archive in archives {
            projected += self.ingester.count_images(archive).await.map_err(decode_failure(archive))?;
        }
        info!("共 {} 个归档，预计 {} 张图片", archives.len(), projected);
        self.check_quota(projected)?;

        let total = archives.len() as u64;
        let mut extracted = 0;
        for (i, archive) in archives.iter().enumerate() {
            let name = archive.file_name().unwrap_or_default().to_string_lossy().into_owned();
            let images = self.ingester.ingest(archive).await.map_err(decode_failure(archive))?;
            let added = crud::add_images(&self.db, &images).await?;
            self.quota.record(added)?;
            metrics::inc_images_extracted(added);
            extracted += added;
            info!("{name}: 导入 {added} 张图片");

            progress.set(Stage::Extract, i as u64 + 1, total, name);
            self.check_quota(0)?;
        }

        info!("解压完成，共导入 {} 张图片，耗时 {:.2}s", extracted, start.elapsed().as_secs_f32());
        Ok(extracted)
    }

    async fn dedup(&self, progress: &Progress) -> Result<Vec<DuplicateGroup>> {
        let start = Instant::now();
        let nodes = crud::get_classified(&self.db)
            .await?
            .into_iter()
            .map(Node::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let total = comparison_count(nodes.len());
        progress.set(Stage::Dedup, 0, total, format!("{} 张图片两两比对", nodes.len()));

        let threshold = self.threshold;
        let exporter = self.exporter.clone();
        let progress = progress.clone();
        let groups = spawn_blocking(move || -> Result<Vec<DuplicateGroup>> {
            let graph = SimilarityGraph::build(nodes, threshold, |n| progress.advance(n))
                .map_err(DedupError::from)?;
            info!("比对完成，共 {} 个节点，{} 条边", graph.len(), graph.edge_count());

            let groups = find_groups(&graph);
            progress.set(Stage::Dedup, total, total, "导出");
            let summary = exporter.export(&groups)?;
            info!(
                "导出 {} 组：硬链接 {}，复制 {}，已存在 {}，跳过 {}，清理 {}",
                summary.groups,
                summary.linked,
                summary.copied,
                summary.existing,
                summary.skipped,
                summary.removed
            );
            Ok(groups)
        })
        .await??;

        metrics::inc_groups_found(groups.len() as u64);
        info!("查重完成，耗时 {:.2}s", start.elapsed().as_secs_f32());
        Ok(groups)
    }
}
