use std::sync::Arc;

use crate::features::colorize::model::Colorizer;

/// 聚合的应用共享状态
///
/// 上色器是进程级单例：启动期构建一次，所有请求只读共享。
#[derive(Clone)]
pub struct AppState {
    pub colorizer: Arc<Colorizer>,
}
