use axum::{Router, routing::get};

use crate::features::colorize::create_colorize_router;
use crate::features::health::health_check;
use crate::state::AppState;

/// 组装应用路由
///
/// `api_prefix` 为空时上色路由直接挂载在根路径，对外暴露 `POST /colorize`
/// （默认行为）；非空时整体嵌套在该前缀下。
pub fn build_router(state: AppState, api_prefix: &str) -> Router {
    let api = Router::new().merge(create_colorize_router());

    let router = Router::new().route("/health", get(health_check));
    let router = if api_prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(api_prefix, api)
    };

    router.with_state(state)
}
