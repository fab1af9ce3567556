use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use tokio::task::spawn_blocking;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::db::crud;
use crate::export::{bundle_results, list_groups};
use crate::ingest::ArchiveKind;
use crate::metrics;

/// 上传归档并开始查重任务
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = UploadResponse),
        (status = 400, description = "没有有效的归档"),
        (status = 429, description = "已有任务在运行"),
    )
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    // 并发上传时后到的请求必须在写文件之前就被拒绝，否则会覆盖正在处理的同名归档
    let _guard = state.upload_lock.lock().await;
    if state.runner.is_running() {
        return Err(AppError::new(StatusCode::TOO_MANY_REQUESTS, crate::error::JobError::Busy));
    }

    let uploads = state.data_dir.uploads();
    tokio::fs::create_dir_all(&uploads).await?;

    let mut names = vec![];
    let mut paths = vec![];
    for file in &data.file {
        let Some(name) = file.metadata.file_name.as_deref().and_then(upload_name) else {
            warn!("忽略上传文件: {:?}", file.metadata.file_name);
            continue;
        };
        let path = uploads.join(name);
        tokio::fs::write(&path, &file.contents).await?;
        info!("已保存上传文件: {}", path.display());
        names.push(name.to_string());
        paths.push(path);
    }

    if paths.is_empty() {
        return Err(AppError::bad_request("没有有效的 zip 或 tar 归档"));
    }

    state
        .runner
        .submit(paths)
        .map_err(|e| AppError::new(StatusCode::TOO_MANY_REQUESTS, e))?;
    Ok(Json(UploadResponse { archives: names }))
}

/// 只保留文件名的最后一段，且必须是受支持的归档格式
fn upload_name(name: &str) -> Option<&str> {
    let name = name.rsplit(['/', '\\']).next()?;
    (!name.is_empty() && ArchiveKind::of(name).is_some()).then_some(name)
}

/// 查询任务进度
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>> {
    let snapshot = state.runner.snapshot();
    let total_images = crud::count_images(state.db()).await?;
    let classified_images = crud::count_classified(state.db()).await?;
    let groups_found = list_groups(&state.data_dir.output())?.len();
    Ok(Json(StatusResponse {
        percent: snapshot.percent(),
        state: snapshot,
        total_images,
        classified_images,
        groups_found,
    }))
}

/// 列出所有重复组
#[utoipa::path(
    get,
    path = "/results",
    responses(
        (status = 200, body = ResultsResponse),
    )
)]
pub async fn results_handler(State(state): State<Arc<AppState>>) -> Result<Json<ResultsResponse>> {
    let groups = list_groups(&state.data_dir.output())?
        .into_iter()
        .map(|group| GroupResult {
            images: group.images.iter().map(|image| format!("/image/{}/{}", group.name, image)).collect(),
            group: group.name,
        })
        .collect();
    Ok(Json(ResultsResponse { groups }))
}

/// 下载结果清单
#[utoipa::path(
    get,
    path = "/download_csv",
    responses(
        (status = 200, description = "带 BOM 的 UTF-8 清单", content_type = "text/csv"),
        (status = 404, description = "尚未生成清单"),
    )
)]
pub async fn download_csv_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let manifest = state.data_dir.manifest();
    if !manifest.exists() {
        return Err(AppError::not_found("结果清单不存在"));
    }
    let data = tokio::fs::read(&manifest).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"dup_groups.csv\""),
        ],
        data,
    ))
}

/// 把所有分组目录和清单打包下载
#[utoipa::path(
    get,
    path = "/download_results",
    responses(
        (status = 200, description = "包含 dup_groups/ 和 dup_groups.csv 的 zip", content_type = "application/zip"),
    )
)]
pub async fn download_results_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let output = state.data_dir.output();
    let manifest = state.data_dir.manifest();
    let data = spawn_blocking(move || bundle_results(&output, &manifest)).await??;
    info!("打包下载结果，共 {} 字节", data.len());
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"results.zip\""),
        ],
        data,
    ))
}

/// 读取重复组中的一张图片
#[utoipa::path(
    get,
    path = "/image/{group}/{file}",
    params(
        ("group" = String, Path, description = "分组目录名"),
        ("file" = String, Path, description = "图片文件名"),
    ),
    responses(
        (status = 200, description = "图片内容", content_type = "application/octet-stream"),
        (status = 404, description = "图片不存在"),
    )
)]
pub async fn image_handler(
    State(state): State<Arc<AppState>>,
    Path((group, file)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let valid = |s: &str| !s.is_empty() && s != ".." && !s.contains(['/', '\\']);
    if !group.starts_with("group_") || !valid(&group) || !valid(&file) {
        return Err(AppError::bad_request("无效的路径"));
    }
    let path = state.data_dir.output().join(&group).join(&file);
    if !path.is_file() {
        return Err(AppError::not_found("图片不存在"));
    }
    let data = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], data))
}

fn content_type(path: &FsPath) -> &'static str {
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// 以 prometheus 文本格式导出指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, description = "指标文本", content_type = "text/plain")))]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use rstest::rstest;
    use tower::ServiceExt;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::classify::Classifier;
    use crate::config::DataDir;
    use crate::db::init_db;
    use crate::ingest::Ingester;
    use crate::job::{JobRunner, Pipeline};
    use crate::server::create_app;

    const BOUNDARY: &str = "casedup-boundary";

    /// 每张图片耗时 500ms，用来让任务保持运行状态
    struct SlowClassifier;

    impl Classifier for SlowClassifier {
        fn predict(&self, _path: &FsPath) -> anyhow::Result<i64> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(1)
        }
    }

    async fn setup() -> anyhow::Result<(tempfile::TempDir, Arc<AppState>)> {
        let dir = tempfile::tempdir()?;
        let data_dir = DataDir::new(dir.path().join("data"));
        data_dir.prepare()?;
        let db = init_db(data_dir.database()).await?;
        let ingester = Ingester::new(data_dir.images(), 8, "png")?;
        let pipeline = Pipeline::new(db, &data_dir, ingester, Arc::new(SlowClassifier));
        Ok((dir, AppState::new(JobRunner::new(pipeline), data_dir)))
    }

    fn app(state: &Arc<AppState>) -> Router {
        create_app(state.clone(), 16 << 20)
    }

    fn zip_with_png() -> Vec<u8> {
        let img = GrayImage::from_fn(18, 16, |x, _| Luma([(x * 10) as u8]));
        let mut png = Cursor::new(vec![]);
        DynamicImage::ImageLuma8(img).write_to(&mut png, ImageFormat::Png).unwrap();

        let mut zip = zip::ZipWriter::new(Cursor::new(vec![]));
        zip.start_file("a.png", SimpleFileOptions::default()).unwrap();
        zip.write_all(png.get_ref()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn upload(files: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = vec![];
        for (name, data) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn error_message(body: &[u8]) -> String {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[rstest]
    #[case("A1_photos.zip", Some("A1_photos.zip"))]
    #[case("C:\\Users\\me\\B2.TAR", Some("B2.TAR"))]
    #[case("../../etc/C3.zip", Some("C3.zip"))]
    #[case("notes.txt", None)]
    #[case("dir/", None)]
    fn test_upload_name(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(upload_name(name), expected);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(FsPath::new("1_A_x.JPG")), "image/jpeg");
        assert_eq!(content_type(FsPath::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_starts_job() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let data = zip_with_png();
        let (status, _, body) = send(app(&state), upload(&[("B2_x.zip", data.as_slice())])).await;
        assert_eq!(status, StatusCode::OK);
        let response: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(response["archives"], serde_json::json!(["B2_x.zip"]));
        assert!(state.data_dir.uploads().join("B2_x.zip").is_file());

        state.runner.wait().await;
        let (status, _, body) = send(app(&state), get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        let response: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(response["status"], "done");
        assert_eq!(response["total_images"], 1);
        assert_eq!(response["groups_found"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_rejected_while_running() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let uploads = state.data_dir.uploads();
        std::fs::create_dir_all(&uploads)?;
        let archive = uploads.join("A1.zip");
        let data = zip_with_png();
        std::fs::write(&archive, &data)?;
        state.runner.submit(vec![archive.clone()])?;

        let (status, _, body) = send(app(&state), upload(&[("A1.zip", &b"other"[..])])).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(error_message(&body).contains("已有任务在运行"));
        // 正在处理的归档没有被覆盖
        assert_eq!(std::fs::read(&archive)?, data);

        state.runner.wait().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_without_archive() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let (status, _, body) = send(app(&state), upload(&[("notes.txt", &b"hello"[..])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body).contains("没有有效的"));
        assert!(!state.runner.is_running());
        Ok(())
    }

    #[tokio::test]
    async fn test_download_csv_missing() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let (status, _, body) = send(app(&state), get("/download_csv")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_message(&body), "结果清单不存在");
        Ok(())
    }

    #[tokio::test]
    async fn test_image_paths() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let group = state.data_dir.output().join("group_1");
        std::fs::create_dir_all(&group)?;
        std::fs::write(group.join("1_A_a.png"), b"png")?;
        std::fs::write(state.data_dir.path().join("secret.png"), b"secret")?;

        let (status, headers, body) = send(app(&state), get("/image/group_1/1_A_a.png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(body, b"png");

        for uri in [
            "/image/other/1_A_a.png",
            "/image/group_1/..%2F..%2Fsecret.png",
            "/image/group_1/..",
            "/image/..%2Fgroup_1/1_A_a.png",
        ] {
            let (status, _, body) = send(app(&state), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(error_message(&body), "无效的路径");
        }

        let (status, _, _) = send(app(&state), get("/image/group_1/missing.png")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_results() -> anyhow::Result<()> {
        let (_dir, state) = setup().await?;
        let group = state.data_dir.output().join("group_1");
        std::fs::create_dir_all(&group)?;
        std::fs::write(group.join("1_A_a.png"), b"png")?;
        std::fs::write(state.data_dir.manifest(), b"\xEF\xBB\xBFgroup_id\n")?;

        let (status, headers, body) = send(app(&state), get("/download_results")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
        assert!(headers[header::CONTENT_DISPOSITION].to_str()?.contains("results.zip"));

        let mut zip = zip::ZipArchive::new(Cursor::new(body))?;
        let mut content = vec![];
        zip.by_name("dup_groups/group_1/1_A_a.png")?.read_to_end(&mut content)?;
        assert_eq!(content, b"png");
        assert!(zip.by_name("dup_groups.csv").is_ok());
        Ok(())
    }
}
