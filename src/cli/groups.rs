use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat};
use crate::export::list_groups;

#[derive(Parser, Debug, Clone)]
pub struct GroupsCommand {
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for GroupsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let groups = list_groups(&opts.data_dir.output())?;
        match self.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            }
            OutputFormat::Table => {
                for group in &groups {
                    println!("{}\t{}", group.name, group.images.join(" "));
                }
            }
        }
        Ok(())
    }
}
