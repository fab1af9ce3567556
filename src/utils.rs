use std::path::PathBuf;

use indicatif::ProgressStyle;
use log::warn;
use walkdir::WalkDir;

use crate::ingest::ArchiveKind;

pub fn pb_style() -> ProgressStyle {
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        Ok(style) => style.progress_chars("#>-"),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// 展开命令行中的归档路径，目录会被递归扫描，结果按路径排序
pub fn collect_archives(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut archives = vec![];
    for path in paths {
        if path.is_dir() {
            let mut found = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| ArchiveKind::of(path).is_some())
                .collect::<Vec<_>>();
            found.sort();
            archives.extend(found);
        } else if ArchiveKind::of(path).is_some() {
            archives.push(path.clone());
        } else {
            warn!("跳过不支持的文件: {}", path.display());
        }
    }
    archives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_archives() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("nested"))?;
        for name in ["B2.zip", "nested/A1.tar", "notes.txt"] {
            std::fs::write(dir.path().join(name), "")?;
        }
        let other = tempfile::tempdir()?;
        let single = other.path().join("C3.ZIP");
        std::fs::write(&single, "")?;

        let archives = collect_archives(&[dir.path().to_path_buf(), single.clone()]);
        assert_eq!(archives, [dir.path().join("B2.zip"), dir.path().join("nested/A1.tar"), single]);
        Ok(())
    }
}
