use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "casedup", "casedup").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 分类器命令，图片路径会作为最后一个参数传入，标准输出的第一个字段为类别编号
    #[arg(long, value_name = "CMD")]
    pub classifier: String,
    /// 需要查重的目标类别编号
    #[arg(long, value_name = "CLASS", default_value_t = 1)]
    pub target_class: i64,
    /// 两张图片被视为重复的最大汉明距离，范围从 0 到 64
    #[arg(short, long, value_name = "N", default_value_t = 5, value_parser = clap::value_parser!(u32).range(0..=64))]
    pub threshold: u32,
    /// 差异哈希的边长，哈希长度为其平方
    #[arg(long, value_name = "N", default_value_t = 8, value_parser = clap::value_parser!(u32).range(2..=32))]
    pub hash_size: u32,
    /// 归档中需要处理的图片后缀，以逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,bmp")]
    pub suffix: String,
    /// 允许处理的图片总数，设置后会写入用量文件
    #[arg(long, value_name = "N")]
    pub max_images: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "casedup", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，保存数据库、图片库和查重结果
    #[arg(short = 'c', long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 导入归档并执行一次完整的查重任务
    Run(RunCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
    /// 计算图片的差异哈希
    Hash(HashCommand),
    /// 列出已导出的重复组
    Groups(GroupsCommand),
    /// 显示图片数量和用量
    Stats(StatsCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// 数据目录，所有持久化文件都放在这里
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 创建所有需要的子目录
    pub fn prepare(&self) -> std::io::Result<()> {
        for dir in [self.path.clone(), self.images(), self.output(), self.uploads()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("cases.db")
    }

    /// 返回图片库目录
    pub fn images(&self) -> PathBuf {
        self.path.join("all_images")
    }

    /// 返回重复组输出目录
    pub fn output(&self) -> PathBuf {
        self.path.join("dup_groups")
    }

    /// 返回结果清单的路径
    pub fn manifest(&self) -> PathBuf {
        self.path.join("dup_groups.csv")
    }

    /// 返回上传文件的保存目录
    pub fn uploads(&self) -> PathBuf {
        self.path.join("uploads")
    }

    /// 返回用量文件的路径
    pub fn usage(&self) -> PathBuf {
        self.path.join("usage.json")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
