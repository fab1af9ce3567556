use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::time::{Duration, sleep};

use crate::cli::SubCommandExtend;
use crate::config::{Opts, PipelineOptions};
use crate::export::list_groups;
use crate::job::{JobRunner, JobStatus, Pipeline};
use crate::utils::{collect_archives, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// 归档文件，文件名中第一个 `_` 之前的部分为案件编号；也可以是包含归档的目录
    #[arg(required = true)]
    pub archives: Vec<PathBuf>,
}

impl SubCommandExtend for RunCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let archives = collect_archives(&self.archives);
        if archives.is_empty() {
            bail!("没有找到可处理的归档");
        }

        let pipeline = Pipeline::open(&opts.data_dir, &self.pipeline).await?;
        let runner = JobRunner::new(pipeline);
        runner.submit(archives)?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        loop {
            let state = runner.snapshot();
            pb.set_length(state.total);
            pb.set_position(state.current);
            pb.set_message(format!("[{}] {}", state.stage, state.detail));
            if state.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(200)).await;
        }
        runner.wait().await;
        pb.finish_and_clear();

        let state = runner.snapshot();
        if state.status == JobStatus::Error {
            return Err(anyhow!(state.error.unwrap_or_default()));
        }

        let found = state.groups.unwrap_or_default();
        let groups = list_groups(&opts.data_dir.output())?;
        info!("结果清单: {}", opts.data_dir.manifest().display());
        println!("找到 {found} 组重复图片");
        for group in groups {
            println!("{}\t{}", group.name, group.images.join(" "));
        }
        Ok(())
    }
}
