use casedup::Opts;
use casedup::cli::SubCommandExtend;
use casedup::config::SubCommand;
use clap::Parser;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Run(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
        SubCommand::Hash(config) => config.run(&opts).await,
        SubCommand::Groups(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
    }
}
