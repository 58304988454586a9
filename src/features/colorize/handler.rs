use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbImage;
use std::time::Instant;

use crate::error::AppError;
use crate::state::AppState;

use super::types::ColorizeResponse;

/// 上传体大小上限（multipart 全体）
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[utoipa::path(
    post,
    path = "/colorize",
    summary = "灰度图上色",
    description = "接收 multipart 上传的单个图像文件，经上色模型推理后返回 base64 编码的 JPEG。输出与输入几何尺寸一致。",
    request_body(
        content = Vec<u8>,
        content_type = "multipart/form-data",
        description = "包含单个图像文件字段（file）的表单"
    ),
    responses(
        (status = 200, description = "上色成功", body = ColorizeResponse),
        (status = 500, description = "请求处理失败", body = crate::error::ErrorBody)
    ),
    tag = "Colorize"
)]
pub async fn colorize_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ColorizeResponse>, AppError> {
    let t_total = Instant::now();

    let upload = read_upload(multipart).await?;
    let upload_bytes = upload.len();

    // 解码/推理/编码都是 CPU 密集的同步工作，必须移出 tokio worker。
    let colorizer = state.colorizer.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<ColorizeResponse, AppError> {
        let img = decode_to_rgb(&upload)?;
        let colorized = colorizer.colorize(&img)?;
        encode_response(&colorized)
    })
    .await
    .map_err(|e| AppError::Internal(format!("阻塞上色任务执行失败: {e}")))??;

    tracing::debug!(
        upload_bytes,
        total_ms = t_total.elapsed().as_millis() as i64,
        "上色完成"
    );

    Ok(Json(response))
}

/// 读取 multipart 中的第一个文件字段
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            return Ok(field.bytes().await?.to_vec());
        }
    }
    Err(AppError::Upload("请求中缺少文件字段".to_string()))
}

/// 解码上传字节为 RGB 位图（任意色彩模式统一转 RGB）
fn decode_to_rgb(bytes: &[u8]) -> Result<RgbImage, AppError> {
    if bytes.is_empty() {
        return Err(AppError::Decode("上传内容为空".to_string()));
    }
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// JPEG 编码 + base64 封装
fn encode_response(img: &RgbImage) -> Result<ColorizeResponse, AppError> {
    let mut jpeg = Vec::new();
    img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut jpeg, 90,
    ))
    .map_err(|e| AppError::Encode(e.to_string()))?;

    Ok(ColorizeResponse {
        image_base64: STANDARD.encode(jpeg),
    })
}

pub fn create_colorize_router() -> Router<AppState> {
    Router::new()
        .route("/colorize", post(colorize_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[cfg(test)]
mod tests {
    use super::{decode_to_rgb, encode_response};
    use crate::error::AppError;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use image::{Rgb, RgbImage};

    #[test]
    fn decode_rejects_empty_and_garbage_bytes() {
        assert!(matches!(decode_to_rgb(&[]), Err(AppError::Decode(_))));
        assert!(matches!(
            decode_to_rgb(b"definitely not an image"),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn decode_normalizes_grayscale_png_to_rgb() {
        let gray = image::GrayImage::from_pixel(6, 4, image::Luma([128u8]));
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(gray)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode png");

        let rgb = decode_to_rgb(&png).expect("decode");
        assert_eq!(rgb.dimensions(), (6, 4));
    }

    #[test]
    fn encode_response_produces_decodable_jpeg() {
        let img = RgbImage::from_pixel(10, 7, Rgb([200, 100, 50]));
        let response = encode_response(&img).expect("encode");

        let jpeg = STANDARD
            .decode(&response.image_base64)
            .expect("valid base64");
        let decoded = image::load_from_memory(&jpeg).expect("valid jpeg");
        assert_eq!(decoded.width(), 10);
        assert_eq!(decoded.height(), 7);
    }
}
