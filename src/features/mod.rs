/// 上色功能模块（请求路径的全部逻辑）
pub mod colorize;
/// 健康检查模块
pub mod health;
