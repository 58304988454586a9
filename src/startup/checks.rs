use crate::config::AppConfig;
use crate::error::AppError;
use git2::{FetchOptions, Progress, RemoteCallbacks, Repository};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// 执行启动检查
///
/// 1. 检查并创建 resources 文件夹
/// 2. 检查并克隆上色模型仓库（已存在时跳过拉取，保证幂等）
/// 3. 校验 ONNX 权重文件（存在性 + 可选 SHA-256）
pub async fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    // 检查并创建 resources 文件夹
    ensure_resources_folder(config)?;

    // 检查并克隆模型仓库
    ensure_model_repo(config)?;

    // 校验权重文件
    ensure_model_weights(config)?;

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 确保 resources 文件夹存在
fn ensure_resources_folder(config: &AppConfig) -> Result<(), AppError> {
    let resources_path = config.resources_path();

    if !resources_path.exists() {
        tracing::warn!("📁 未找到 resources 文件夹，正在创建: {:?}", resources_path);
        fs::create_dir_all(&resources_path)
            .map_err(|e| AppError::Internal(format!("创建 resources 文件夹失败: {e}")))?;
        tracing::info!("✅ resources 文件夹创建成功");
    } else {
        tracing::info!("✅ resources 文件夹已存在");
    }

    Ok(())
}

/// 确保模型仓库存在
///
/// 已存在的目录直接复用，不再触网：同一文件系统位置的第二次启动必须跳过拉取。
fn ensure_model_repo(config: &AppConfig) -> Result<(), AppError> {
    let repo_path = config.model_repo_path();

    if repo_path.exists() {
        tracing::info!("✅ 模型仓库已存在，跳过拉取: {:?}", repo_path);

        // 目录在但不是有效 git 仓库时仅告警，权重校验仍会兜底。
        if Repository::open(&repo_path).is_err() {
            tracing::warn!("⚠️ {:?} 不是有效的 Git 仓库，将按普通目录使用", repo_path);
        }
    } else {
        tracing::info!("📦 正在克隆上色模型仓库...");
        tracing::info!("📍 仓库地址: {}", config.resources.model_repo);
        tracing::info!("📂 目标路径: {:?}", repo_path);

        clone_repository(&config.resources.model_repo, &repo_path)?;

        tracing::info!("✅ 模型仓库克隆成功");
    }

    Ok(())
}

/// 克隆 Git 仓库
fn clone_repository(url: &str, path: &Path) -> Result<(), AppError> {
    // 创建进度回调
    let mut callbacks = RemoteCallbacks::new();
    let mut last_progress = 0;

    callbacks.transfer_progress(|progress: Progress| {
        let current = progress.received_objects();
        let total = progress.total_objects();
        let percentage = if total > 0 {
            (current as f64 / total as f64 * 100.0) as u32
        } else {
            0
        };

        // 每 10% 打印一次进度
        if percentage >= last_progress + 10 {
            tracing::info!("⏬ 克隆进度: {}% ({}/{})", percentage, current, total);
            last_progress = percentage;
        }

        true
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options);

    builder
        .clone(url, path)
        .map_err(|e| AppError::Internal(format!("克隆 Git 仓库失败: {e}")))?;

    Ok(())
}

/// 校验 ONNX 权重文件
fn ensure_model_weights(config: &AppConfig) -> Result<(), AppError> {
    let weights_path = config.model_weights_path();

    if !weights_path.exists() {
        return Err(AppError::Internal(format!(
            "未找到 ONNX 权重文件: {}（检查 model.weights_path 配置）",
            weights_path.display()
        )));
    }

    if let Some(expected) = config.model.weights_sha256.as_deref() {
        let actual = sha256_hex(&weights_path)?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(AppError::Internal(format!(
                "权重文件 SHA-256 不匹配: 期望 {expected}，实际 {actual}"
            )));
        }
        tracing::info!("✅ 权重文件 SHA-256 校验通过");
    }

    tracing::info!("✅ 权重文件就绪: {}", weights_path.display());
    Ok(())
}

/// 计算文件的 SHA-256（十六进制小写）
fn sha256_hex(path: &Path) -> Result<String, AppError> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::Internal(format!("读取权重文件失败: {e}")))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
