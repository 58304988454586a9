use serde::{Deserialize, Serialize};

/// 上色成功响应
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ColorizeResponse {
    /// 上色结果的 JPEG 字节，base64 编码
    #[schema(example = "/9j/4AAQSkZJRg...")]
    pub image_base64: String,
}
