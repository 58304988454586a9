use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
///
/// 变体只服务于内部日志与测试断言；对外一律折叠为同一个 500 信封
/// （见 [`ErrorBody`]），不向调用方区分客户端错误与服务端错误。
#[derive(Error, Debug)]
pub enum AppError {
    /// 上传体读取错误（multipart 解析、缺少文件字段等）
    #[error("上传读取失败: {0}")]
    Upload(String),

    /// 图像解码错误
    #[error("图像解码失败: {0}")]
    Decode(String),

    /// 模型推理错误（预处理 / 前向 / 后处理）
    #[error("模型推理失败: {0}")]
    Model(String),

    /// 响应编码错误（JPEG 编码）
    #[error("图像编码失败: {0}")]
    Encode(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误响应体：`{"detail": "Error: <message>"}`
///
/// 这是对外契约的一部分，所有请求处理失败都返回该结构加 500 状态码。
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// 人类可读的错误描述，固定以 `Error: ` 开头。
    #[schema(example = "Error: 图像解码失败: unsupported image format")]
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!("请求处理失败: {}", self);
        let body = ErrorBody {
            detail: format!("Error: {self}"),
        };
        let mut res = Json(body).into_response();
        *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Decode(err.to_string())
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::Model(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::Upload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::{http::StatusCode, response::IntoResponse};

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("parse json")
    }

    #[tokio::test]
    async fn all_variants_map_to_500() {
        for err in [
            AppError::Upload("x".into()),
            AppError::Decode("x".into()),
            AppError::Model("x".into()),
            AppError::Encode("x".into()),
            AppError::Internal("x".into()),
        ] {
            let res = err.into_response();
            assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn detail_field_carries_error_prefix_and_message() {
        let res = AppError::Decode("bad magic".into()).into_response();
        let json = body_json(res).await;
        let detail = json["detail"].as_str().expect("detail string");
        assert!(detail.starts_with("Error: "), "got: {detail}");
        assert!(detail.contains("bad magic"));
    }
}
