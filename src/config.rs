use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        8000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// 资源基础路径
    #[serde(default = "ResourcesConfig::default_base_path")]
    pub base_path: String,
    /// 上色模型仓库 URL（首次启动时克隆）
    #[serde(default = "ResourcesConfig::default_model_repo")]
    pub model_repo: String,
    /// 模型仓库在 base_path 下的文件夹名
    #[serde(default = "ResourcesConfig::default_model_folder")]
    pub model_folder: String,
}

impl ResourcesConfig {
    fn default_base_path() -> String {
        "./resources".to_string()
    }
    fn default_model_repo() -> String {
        "https://github.com/lehbchau/palette-extraction-and-colorization".to_string()
    }
    fn default_model_folder() -> String {
        "palette_repo".to_string()
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            base_path: Self::default_base_path(),
            model_repo: Self::default_model_repo(),
            model_folder: Self::default_model_folder(),
        }
    }
}

/// 模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// ONNX 权重文件路径（相对模型仓库根目录）
    #[serde(default = "ModelConfig::default_weights_path")]
    pub weights_path: String,
    /// 权重文件 SHA-256（十六进制，留空则跳过校验）
    #[serde(default)]
    pub weights_sha256: Option<String>,
    /// 工作分辨率（预处理缩放目标，两轴相同）
    #[serde(default = "ModelConfig::default_working_size")]
    pub working_size: u32,
    /// 推理设备
    #[serde(default)]
    pub device: ModelDevice,
    /// ONNX Runtime intra-op 线程数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub intra_threads: u32,
}

/// 推理设备枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelDevice {
    /// 通用 CPU 推理
    #[default]
    Cpu,
    /// CUDA 加速（需启用 `cuda` feature；初始化失败时回退 CPU）
    Cuda,
}

impl ModelConfig {
    fn default_weights_path() -> String {
        "models/colorizer.onnx".to_string()
    }
    fn default_working_size() -> u32 {
        256
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: Self::default_weights_path(),
            weights_sha256: None,
            working_size: Self::default_working_size(),
            device: ModelDevice::default(),
            intra_threads: 0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// 日志格式
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_format() -> String {
        "full".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    /// API 路由前缀（空字符串表示挂载在根路径，即 `POST /colorize`）
    #[serde(default)]
    pub prefix: String,
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default)]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout_secs() -> u64 {
        30
    }

    /// 超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// 模型配置
    #[serde(default)]
    pub model: ModelConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    ///
    /// 配置文件是可选的：服务自身不要求任何配置项（所有字段都有默认值），
    /// 存在 `config.toml` 时才读取。
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件（可选）", config_path);

        let builder = ConfigBuilder::builder()
            // 加载配置文件（允许缺失）
            .add_source(File::with_name(config_path.to_str().unwrap()).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER_PORT
            .add_source(
                Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;

        tracing::debug!(
            "配置加载完成: working_size = {}, device = {:?}",
            config.model.working_size,
            config.model.device
        );

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 获取资源文件夹路径
    pub fn resources_path(&self) -> PathBuf {
        PathBuf::from(&self.resources.base_path)
    }

    /// 获取模型仓库完整路径
    pub fn model_repo_path(&self) -> PathBuf {
        self.resources_path().join(&self.resources.model_folder)
    }

    /// 获取 ONNX 权重文件完整路径
    pub fn model_weights_path(&self) -> PathBuf {
        self.model_repo_path().join(&self.model.weights_path)
    }
}
