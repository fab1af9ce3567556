use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use encoding_rs::GBK;
use futures::StreamExt;
use log::{debug, warn};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::task::spawn_blocking;
use tokio_tar::Archive;
use zip::ZipArchive;

use crate::db::NewImage;
use crate::dhash::d_hash_bytes;

/// 按条目头部声明的大小预分配缓冲区的上限，超出部分由读取时自动扩容
const PREALLOC_LIMIT: usize = 64 << 20;

/// 支持的归档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
}

impl ArchiveKind {
    /// 根据扩展名判断归档格式
    pub fn of(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "zip" => Some(Self::Zip),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }
}

/// 从归档文件名中取出案件编号，即文件名（不含扩展名）中第一个 `_` 之前的部分
pub fn case_id_of(path: impl AsRef<Path>) -> String {
    let stem = path.as_ref().file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    stem.split('_').next().unwrap_or_default().to_string()
}

/// 修复归档中被错误编码的文件名
///
/// 很多压缩工具在中文系统下用 GBK 保存文件名却不设置 UTF-8 标志，解压库会按 CP437 解码，
/// 得到一串乱码。这里依次尝试 UTF-8 和 GBK，都失败时保留原来的文件名。
pub fn recover_name(raw: &[u8], fallback: &str) -> String {
    if let Ok(name) = std::str::from_utf8(raw) {
        return name.to_string();
    }
    match GBK.decode_without_bom_handling_and_without_replacement(raw) {
        Some(name) => name.into_owned(),
        None => {
            debug!("无法修复文件名，保留原始名称: {fallback}");
            fallback.to_string()
        }
    }
}

/// 取路径的最后一段，归档内的路径分隔符可能是 `/` 也可能是 `\`
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// 头部声明的大小不可信，只按声明大小预分配有限的容量
fn entry_buffer(declared: u64) -> Vec<u8> {
    Vec::with_capacity(usize::try_from(declared).unwrap_or(usize::MAX).min(PREALLOC_LIMIT))
}

/// 解压归档中的图片到图片库，并计算每张图片的哈希
#[derive(Debug, Clone)]
pub struct Ingester {
    store: PathBuf,
    hash_size: u32,
    re_suf: Regex,
}

impl Ingester {
    /// `suffix` 为逗号分隔的扩展名列表，不区分大小写
    pub fn new(store: impl Into<PathBuf>, hash_size: u32, suffix: &str) -> Result<Self> {
        let re_suf = Regex::new(&format!("(?i)^({})$", suffix.replace(',', "|")))
            .context("无效的文件后缀")?;
        Ok(Self { store: store.into(), hash_size, re_suf })
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    fn is_supported(&self, name: &str) -> bool {
        Path::new(base_name(name))
            .extension()
            .is_some_and(|ext| self.re_suf.is_match(&ext.to_string_lossy()))
    }

    /// 统计归档中受支持的图片数量，用于提取前的额度检查
    pub async fn count_images(&self, archive: &Path) -> Result<u64> {
        match ArchiveKind::of(archive) {
            Some(ArchiveKind::Zip) => {
                let this = self.clone();
                let archive = archive.to_path_buf();
                spawn_blocking(move || -> Result<u64> {
                    let zip = ZipArchive::new(BufReader::new(File::open(&archive)?))?;
                    let count = zip
                        .file_names()
                        .filter(|name| !name.ends_with('/') && this.is_supported(name))
                        .count();
                    Ok(count as u64)
                })
                .await?
            }
            Some(ArchiveKind::Tar) => {
                let mut archive = Archive::new(tokio::fs::File::open(archive).await?);
                let mut entries = archive.entries()?;
                let mut count = 0;
                while let Some(entry) = entries.next().await {
                    let entry = entry?;
                    if entry.header().entry_type().is_file()
                        && self.is_supported(&String::from_utf8_lossy(&entry.path_bytes()))
                    {
                        count += 1;
                    }
                }
                Ok(count)
            }
            None => Err(anyhow!("不支持的归档格式: {}", archive.display())),
        }
    }

    /// 解压一个归档，返回待写入数据库的记录
    pub async fn ingest(&self, archive: &Path) -> Result<Vec<NewImage>> {
        let case_id = case_id_of(archive);
        match ArchiveKind::of(archive) {
            Some(ArchiveKind::Zip) => {
                let this = self.clone();
                let archive = archive.to_path_buf();
                spawn_blocking(move || this.ingest_zip(&archive, &case_id)).await?
            }
            Some(ArchiveKind::Tar) => self.ingest_tar(archive, &case_id).await,
            None => Err(anyhow!("不支持的归档格式: {}", archive.display())),
        }
    }

    fn ingest_zip(&self, archive: &Path, case_id: &str) -> Result<Vec<NewImage>> {
        let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
        let mut images = vec![];
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = recover_name(entry.name_raw(), entry.name());
            if !self.is_supported(&name) {
                continue;
            }
            let mut data = entry_buffer(entry.size());
            entry.read_to_end(&mut data)?;
            images.push(self.save_image(case_id, &name, &data)?);
        }
        Ok(images)
    }

    async fn ingest_tar(&self, archive: &Path, case_id: &str) -> Result<Vec<NewImage>> {
        let mut archive = Archive::new(tokio::fs::File::open(archive).await?);
        let mut entries = archive.entries()?;
        let mut images = vec![];

        // NOTE: tar 的 entries 必须按顺序读取，不能乱序并发
        while let Some(entry) = entries.next().await {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = {
                let raw = entry.path_bytes();
                recover_name(&raw, &String::from_utf8_lossy(&raw))
            };
            if !self.is_supported(&name) {
                continue;
            }

            let mut data = entry_buffer(entry.header().size()?);
            entry.read_to_end(&mut data).await?;

            let this = self.clone();
            let case_id = case_id.to_string();
            images.push(spawn_blocking(move || this.save_image(&case_id, &name, &data)).await??);
        }
        Ok(images)
    }

    /// 写入图片库并计算哈希
    ///
    /// NOTE: 同一案件的不同归档中若存在同名文件，后写入的会覆盖先写入的，
    /// 数据库中两条记录将指向同一个文件
    fn save_image(&self, case_id: &str, name: &str, data: &[u8]) -> Result<NewImage> {
        let orig_name = base_name(name).to_string();
        let new_name = format!("{case_id}_{orig_name}");
        let dst = self.store.join(&new_name);
        if dst.exists() {
            warn!("图片库中已存在同名文件，将被覆盖: {new_name}");
        }
        std::fs::write(&dst, data).with_context(|| format!("写入图片失败: {}", dst.display()))?;
        let hash = d_hash_bytes(data, self.hash_size)
            .with_context(|| format!("计算哈希失败: {name}"))?;
        Ok(NewImage { case_id: case_id.to_string(), orig_name, new_name, hash })
    }
}
