use palette_backend::config::AppConfig;
use palette_backend::cors::build_cors_layer;
use palette_backend::features::colorize::model::{Colorizer, OnnxPredictor};
use palette_backend::routes::build_router;
use palette_backend::shutdown::ShutdownManager;
use palette_backend::startup::run_startup_checks;
use palette_backend::state::AppState;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 响应主体是 JSON（内含 base64 JPEG 文本），压缩有收益；
    // 原生图片/二进制下载类型本身已压缩，明确排除。
    SizeAbove::default()
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::const_new("application/octet-stream"))
}


#[derive(OpenApi)]
#[openapi(
    paths(
        palette_backend::features::colorize::handler::colorize_image,
        palette_backend::features::health::handler::health_check,
    ),
    components(
        schemas(
            palette_backend::features::colorize::ColorizeResponse,
            palette_backend::error::ErrorBody,
        )
    ),
    tags(
        (name = "Colorize", description = "Colorize APIs"),
        (name = "Health", description = "Health APIs"),
    ),
    info(
        title = "Palette Backend API",
        version = "0.1.0",
        description = "Grayscale colorization service (Axum)"
    )
)]
pub struct ApiDoc;


#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palette_backend=info,tower_http=info".into()),
        )
        .init();

    // 创建优雅退出管理器
    let shutdown_manager = ShutdownManager::new();

    // Load config
    if let Err(e) = AppConfig::init_global() {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    // 启动信号处理器
    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // Run startup checks（资源目录 + 模型仓库按需克隆 + 权重校验）
    if let Err(e) = run_startup_checks(config).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    // 加载上色模型（进程级单例，失败直接终止启动）
    let weights_path = config.model_weights_path();
    let predictor = match OnnxPredictor::load(&weights_path, &config.model) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("模型加载失败: {}", e);
            std::process::exit(1);
        }
    };
    let colorizer = Arc::new(Colorizer::new(
        Box::new(predictor),
        config.model.working_size,
    ));

    // Shared state
    let app_state = AppState { colorizer };

    // Routes（默认配置下上色路由挂载在根路径，即 POST /colorize）
    let mut app = build_router(app_state, &config.api.prefix)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // CORS（按配置挂载）
    if let Some(cors) = build_cors_layer(&config.cors) {
        app = app.layer(cors);
    }

    // 应用内响应压缩：JSON/文本启用 gzip/brotli，降低 base64 响应的带宽占用。
    app = app.layer(CompressionLayer::new().compress_when(compression_predicate()));

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Colorize API: http://{}{}/colorize", addr, config.api.prefix);
    tracing::info!("Model repo: {:?}", config.model_repo_path());

    // 启动服务器并等待优雅退出信号
    let shutdown_timeout = config.shutdown.timeout_duration();
    let shutdown_signal = async move {
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅退出...", reason);

        // 超时兜底：在途请求迟迟不结束时强制退出
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            tracing::warn!("优雅退出超时（{}s），强制退出", shutdown_timeout.as_secs());
            std::process::exit(1);
        });
    };

    let graceful = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    tracing::info!("服务器已优雅关闭");
}
