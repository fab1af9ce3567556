use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use utoipa::ToSchema;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::cluster::{DuplicateGroup, GroupMember};
use crate::error::DedupError;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const HEADER: [&str; 5] = ["group_id", "db_id", "case_id", "file_name", "img_hash"];

/// 导出结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub groups: usize,
    pub linked: usize,
    pub copied: usize,
    pub existing: usize,
    pub skipped: usize,
    /// 上一次导出遗留、本次已删除的文件和目录
    pub removed: usize,
}

/// 一个已导出的分组目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GroupListing {
    /// 目录名，如 `group_3`
    pub name: String,
    /// 目录中的图片文件名，已排序
    pub images: Vec<String>,
}

/// 把重复组写入分组目录和清单文件
#[derive(Debug, Clone)]
pub struct Exporter {
    store: PathBuf,
    output_dir: PathBuf,
    manifest: PathBuf,
}

enum Placed {
    Linked,
    Copied,
    Existing,
    Skipped,
}

impl Exporter {
    pub fn new(
        store: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        manifest: impl Into<PathBuf>,
    ) -> Self {
        Self { store: store.into(), output_dir: output_dir.into(), manifest: manifest.into() }
    }

    /// 导出所有重复组
    ///
    /// 清单每次都会被完整重写；分组目录中已存在的文件保持不变，
    /// 因此对同样的输入重复导出得到的结果完全相同。
    /// 不属于本次任何分组的目录和文件会被删除，输出目录始终与清单一致。
    pub fn export(&self, groups: &[DuplicateGroup]) -> Result<ExportSummary> {
        fs::create_dir_all(&self.output_dir).map_err(|source| DedupError::ExportIoFailure {
            path: self.output_dir.clone(),
            source,
        })?;

        let layout = groups
            .iter()
            .map(|group| {
                let files = group.members.iter().map(member_file).collect::<HashSet<_>>();
                (group_dir_name(group.group_id), files)
            })
            .collect::<HashMap<_, _>>();
        let removed = self.prune(&layout)?;
        if removed > 0 {
            info!("删除了 {removed} 个过期的分组文件");
        }

        let mut summary = ExportSummary { groups: groups.len(), removed, ..Default::default() };
        for group in groups {
            let dir = self.output_dir.join(group_dir_name(group.group_id));
            fs::create_dir_all(&dir)
                .map_err(|source| DedupError::ExportIoFailure { path: dir.clone(), source })?;
            for member in &group.members {
                let src = self.store.join(&member.file_name);
                let dst = dir.join(member_file(member));
                match place(&src, &dst) {
                    Placed::Linked => summary.linked += 1,
                    Placed::Copied => summary.copied += 1,
                    Placed::Existing => summary.existing += 1,
                    Placed::Skipped => summary.skipped += 1,
                }
            }
        }

        self.write_manifest(groups)?;
        Ok(summary)
    }

    /// 删除 `layout` 之外的分组目录，以及分组目录中不属于该组的文件
    fn prune(&self, layout: &HashMap<String, HashSet<String>>) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.output_dir).map_err(io_failure(&self.output_dir))? {
            let entry = entry.map_err(io_failure(&self.output_dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if group_number(&name).is_none() || !entry.path().is_dir() {
                continue;
            }
            let Some(files) = layout.get(&name) else {
                debug!("删除过期分组: {name}");
                fs::remove_dir_all(entry.path()).map_err(io_failure(&entry.path()))?;
                removed += 1;
                continue;
            };
            for file in fs::read_dir(entry.path()).map_err(io_failure(&entry.path()))? {
                let file = file.map_err(io_failure(&entry.path()))?;
                if !files.contains(&*file.file_name().to_string_lossy()) {
                    debug!("删除过期文件: {}", file.path().display());
                    fs::remove_file(file.path()).map_err(io_failure(&file.path()))?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn write_manifest(&self, groups: &[DuplicateGroup]) -> Result<()> {
        let io_err = |source| DedupError::ExportIoFailure { path: self.manifest.clone(), source };

        let mut file = File::create(&self.manifest).map_err(io_err)?;
        file.write_all(BOM).map_err(io_err)?;

        let mut wtr = csv::Writer::from_writer(file);
        wtr.write_record(HEADER)?;
        for group in groups {
            for member in &group.members {
                wtr.write_record([
                    group.group_id.to_string(),
                    member.image_id.to_string(),
                    member.case_id.clone(),
                    member.file_name.clone(),
                    member.hash.clone(),
                ])?;
            }
        }
        wtr.flush().map_err(io_err)?;
        Ok(())
    }
}

/// 优先硬链接，失败时退回复制，复制也失败时只记录警告
fn place(src: &Path, dst: &Path) -> Placed {
    match fs::hard_link(src, dst) {
        Ok(()) => Placed::Linked,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Placed::Existing,
        Err(e) => {
            debug!("硬链接失败，改为复制 {}: {}", src.display(), e);
            match fs::copy(src, dst) {
                Ok(_) => Placed::Copied,
                Err(e) => {
                    warn!("无法导出图片 {}: {}", src.display(), e);
                    Placed::Skipped
                }
            }
        }
    }
}

fn io_failure(path: &Path) -> impl FnOnce(io::Error) -> DedupError {
    let path = path.to_path_buf();
    move |source| DedupError::ExportIoFailure { path, source }
}

fn group_dir_name(group_id: u64) -> String {
    format!("group_{group_id}")
}

fn member_file(member: &GroupMember) -> String {
    format!("{}_{}", member.image_id, member.file_name)
}

fn group_number(name: &str) -> Option<u64> {
    name.strip_prefix("group_")?.parse().ok()
}

/// 列出输出目录下的所有分组，按组号排序
///
/// 输出目录不存在时返回空列表
pub fn list_groups(output_dir: &Path) -> Result<Vec<GroupListing>> {
    if !output_dir.exists() {
        return Ok(vec![]);
    }

    let mut groups = vec![];
    for entry in fs::read_dir(output_dir)
        .with_context(|| format!("无法读取输出目录: {}", output_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(id) = group_number(&name) else {
            continue;
        };
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let mut images = fs::read_dir(entry.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        images.sort();
        groups.push((id, GroupListing { name, images }));
    }

    groups.sort_by_key(|(id, _)| *id);
    Ok(groups.into_iter().map(|(_, g)| g).collect())
}

/// 把分组目录和清单打包成一个 zip，包内路径为 `dup_groups/group_N/...` 和 `dup_groups.csv`
///
/// 两者都不存在时得到一个空的 zip
pub fn bundle_results(output_dir: &Path, manifest: &Path) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    let options = SimpleFileOptions::default();

    if output_dir.exists() {
        let root = output_dir.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
        let mut files = vec![];
        for entry in WalkDir::new(output_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        for path in files {
            let relative = path.strip_prefix(output_dir)?;
            let name = Path::new(&*root).join(relative);
            zip.start_file(name.to_string_lossy().replace('\\', "/"), options)?;
            zip.write_all(&fs::read(&path)?)?;
        }
    }

    if manifest.exists() {
        let name = manifest.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(manifest)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(image_id: i64, case_id: &str) -> GroupMember {
        GroupMember {
            image_id,
            case_id: case_id.to_string(),
            file_name: format!("{case_id}_p{image_id}.jpg"),
            hash: "0".repeat(64),
        }
    }

    fn setup() -> Result<(tempfile::TempDir, Exporter, Vec<DuplicateGroup>)> {
        let dir = tempfile::tempdir()?;
        let store = dir.path().join("all_images");
        fs::create_dir_all(&store)?;
        let groups = vec![
            DuplicateGroup { group_id: 1, members: vec![member(1, "A"), member(2, "B")] },
            DuplicateGroup { group_id: 2, members: vec![member(3, "A"), member(4, "C")] },
        ];
        for m in groups.iter().flat_map(|g| &g.members) {
            fs::write(store.join(&m.file_name), m.image_id.to_string())?;
        }
        let exporter = Exporter::new(
            store,
            dir.path().join("dup_groups"),
            dir.path().join("dup_groups.csv"),
        );
        Ok((dir, exporter, groups))
    }

    #[test]
    fn test_export_layout() -> Result<()> {
        let (dir, exporter, groups) = setup()?;
        let summary = exporter.export(&groups)?;
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.linked + summary.copied, 4);

        let out = dir.path().join("dup_groups");
        assert_eq!(fs::read_to_string(out.join("group_1/2_B_p2.jpg"))?, "2");
        assert_eq!(fs::read_to_string(out.join("group_2/4_C_p4.jpg"))?, "4");

        let manifest = fs::read(dir.path().join("dup_groups.csv"))?;
        assert!(manifest.starts_with(BOM));
        let text = String::from_utf8(manifest[BOM.len()..].to_vec())?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "group_id,db_id,case_id,file_name,img_hash");
        assert_eq!(lines[1], format!("1,1,A,A_p1.jpg,{}", "0".repeat(64)));
        assert_eq!(lines.len(), 5);
        Ok(())
    }

    #[test]
    fn test_export_idempotent() -> Result<()> {
        let (dir, exporter, groups) = setup()?;
        exporter.export(&groups)?;
        let manifest = fs::read(dir.path().join("dup_groups.csv"))?;
        let listing = list_groups(&dir.path().join("dup_groups"))?;

        let summary = exporter.export(&groups)?;
        assert_eq!(summary.existing, 4);
        assert_eq!(fs::read(dir.path().join("dup_groups.csv"))?, manifest);
        assert_eq!(list_groups(&dir.path().join("dup_groups"))?, listing);
        Ok(())
    }

    #[test]
    fn test_missing_source_is_skipped() -> Result<()> {
        let (dir, exporter, groups) = setup()?;
        fs::remove_file(dir.path().join("all_images/C_p4.jpg"))?;
        let summary = exporter.export(&groups)?;
        assert_eq!(summary.skipped, 1);
        let text = fs::read_to_string(dir.path().join("dup_groups.csv"))?;
        assert!(text.contains("2,4,C,C_p4.jpg"));
        Ok(())
    }

    #[test]
    fn test_list_groups_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["group_10", "group_2", "other"] {
            fs::create_dir_all(dir.path().join(name))?;
        }
        fs::write(dir.path().join("group_2/b.jpg"), "")?;
        fs::write(dir.path().join("group_2/a.jpg"), "")?;

        let groups = list_groups(dir.path())?;
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["group_2", "group_10"]);
        assert_eq!(groups[0].images, ["a.jpg", "b.jpg"]);
        assert!(list_groups(&dir.path().join("missing"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_stale_groups_removed() -> Result<()> {
        let (dir, exporter, groups) = setup()?;
        exporter.export(&groups)?;

        // 第二次运行两组合并为一组
        let merged = vec![DuplicateGroup {
            group_id: 1,
            members: vec![member(1, "A"), member(4, "C")],
        }];
        let summary = exporter.export(&merged)?;
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.existing, 1);

        let listing = list_groups(&dir.path().join("dup_groups"))?;
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].images, ["1_A_p1.jpg", "4_C_p4.jpg"]);
        Ok(())
    }

    #[test]
    fn test_bundle_results() -> Result<()> {
        let (dir, exporter, groups) = setup()?;
        exporter.export(&groups)?;

        let data = bundle_results(&dir.path().join("dup_groups"), &dir.path().join("dup_groups.csv"))?;
        let mut zip = zip::ZipArchive::new(Cursor::new(data))?;
        let mut names = zip.file_names().map(str::to_string).collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            [
                "dup_groups.csv",
                "dup_groups/group_1/1_A_p1.jpg",
                "dup_groups/group_1/2_B_p2.jpg",
                "dup_groups/group_2/3_A_p3.jpg",
                "dup_groups/group_2/4_C_p4.jpg",
            ]
        );

        let mut content = String::new();
        io::Read::read_to_string(&mut zip.by_name("dup_groups/group_2/4_C_p4.jpg")?, &mut content)?;
        assert_eq!(content, "4");

        let empty = bundle_results(&dir.path().join("missing"), &dir.path().join("missing.csv"))?;
        assert_eq!(zip::ZipArchive::new(Cursor::new(empty))?.len(), 0);
        Ok(())
    }
}
