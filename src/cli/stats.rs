use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};
use crate::export::list_groups;
use crate::quota::UsageLedger;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        opts.data_dir.prepare()?;
        let db = init_db(opts.data_dir.database()).await?;
        let usage = UsageLedger::open(opts.data_dir.usage(), None)?.usage();

        println!("图片总数: {}", crud::count_images(&db).await?);
        println!("目标类别: {}", crud::count_classified(&db).await?);
        println!("重复组数: {}", list_groups(&opts.data_dir.output())?.len());
        println!("已处理图片: {}", usage.total_images_processed);
        match usage.total_images_allowed {
            Some(limit) => println!("图片额度: {limit}"),
            None => println!("图片额度: 不限"),
        }
        println!("完成任务: {}", usage.runs);
        Ok(())
    }
}
