use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, PipelineOptions};
use crate::job::{JobRunner, Pipeline};
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 上传大小限制，单位为 MB
    #[arg(long, value_name = "MB", default_value_t = 1024)]
    pub upload_limit: usize,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let pipeline = Pipeline::open(&opts.data_dir, &self.pipeline).await?;

        // 创建应用状态
        let state = server::AppState::new(JobRunner::new(pipeline), opts.data_dir.clone());

        // 创建应用
        let app = server::create_app(state, self.upload_limit * 1024 * 1024);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
