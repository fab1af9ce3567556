use sqlx::FromRow;

use crate::hamming::{DHash, ParseHashError};

/// 图片记录
#[derive(Debug, Clone, FromRow)]
pub struct ImageRecord {
    /// 图片 ID，单调递增
    pub id: i64,
    /// 案件编号，来自归档文件名
    pub case_id: String,
    /// 归档内的原始文件名
    pub orig_name: String,
    /// 图片库中的文件名
    pub new_name: String,
    /// 是否被分类器判定为目标类别
    pub classified: bool,
    /// 差异哈希的文本形式
    pub img_hash: String,
}

impl ImageRecord {
    pub fn hash(&self) -> Result<DHash, ParseHashError> {
        self.img_hash.parse()
    }
}

/// 待写入的图片记录
#[derive(Debug, Clone)]
pub struct NewImage {
    pub case_id: String,
    pub orig_name: String,
    pub new_name: String,
    pub hash: DHash,
}
