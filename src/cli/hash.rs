use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::dhash::{DEFAULT_HASH_SIZE, d_hash_file};

#[derive(Parser, Debug, Clone)]
pub struct HashCommand {
    /// 图片路径，给出两张图片时额外输出它们的汉明距离
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
    /// 差异哈希的边长
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HASH_SIZE)]
    pub hash_size: u32,
}

impl SubCommandExtend for HashCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let mut hashes = vec![];
        for path in &self.images {
            let hash = d_hash_file(path, self.hash_size)
                .with_context(|| format!("无法计算哈希: {}", path.display()))?;
            println!("{}\t{}", hash, path.display());
            hashes.push(hash);
        }
        if let [a, b] = hashes.as_slice() {
            println!("distance: {}", a.hamming(b)?);
        }
        Ok(())
    }
}
