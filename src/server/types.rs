use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::job::JobState;

/// 上传请求参数
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    pub file: Vec<FieldData<Bytes>>,
}

/// 上传表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// 上传的归档文件，可以是多个，只接受 zip 和 tar
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 上传响应
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// 已保存并提交的归档文件名
    pub archives: Vec<String>,
}

/// 任务状态响应
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub state: JobState,
    /// 当前阶段的进度百分比
    pub percent: u8,
    pub total_images: i64,
    pub classified_images: i64,
    pub groups_found: usize,
}

/// 一个重复组
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupResult {
    pub group: String,
    /// 图片的访问路径
    pub images: Vec<String>,
}

/// 查重结果响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ResultsResponse {
    pub groups: Vec<GroupResult>,
}
