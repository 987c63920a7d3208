use anyhow::Context;
use clap::{Parser, Subcommand};
use msme_sync::{
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    logging, ApiClient, NotificationManager, ProfileType, UploadFile, UploadOptions, Uploader,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "msme-sync", about = "媒体上传与未读通知客户端")]
struct Cli {
    /// 配置文件路径
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件（预签名批量上传）
    Upload {
        /// 待上传文件
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// 目标目录（默认取配置 upload.default_folder）
        #[arg(long)]
        folder: Option<String>,
        /// 并发上传数
        #[arg(long)]
        concurrency: Option<usize>,
        /// 跳过预签名，直接 multipart 上传到应用服务器
        #[arg(long)]
        direct: bool,
    },
    /// 跟踪资料的未读消息数，Ctrl+C 退出
    Watch {
        #[arg(long)]
        profile_id: String,
        /// user 或 company
        #[arg(long, default_value = "user")]
        profile_type: ProfileType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config).await;
    config.validate().context("配置校验失败")?;

    // 🔥 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&config.log);
    info!("MSME Sync v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let api = Arc::new(ApiClient::new(&config.api).context("创建 API 客户端失败")?);

    match cli.command {
        Commands::Upload {
            files,
            folder,
            concurrency,
            direct,
        } => run_upload(&config, api, files, folder, concurrency, direct).await,
        Commands::Watch {
            profile_id,
            profile_type,
        } => run_watch(&config, api, profile_id, profile_type).await,
    }
}

async fn run_upload(
    config: &AppConfig,
    api: Arc<ApiClient>,
    paths: Vec<PathBuf>,
    folder: Option<String>,
    concurrency: Option<usize>,
    direct: bool,
) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(UploadFile::from_path(path).await?);
    }

    let cancel = CancellationToken::new();
    let mut options = UploadOptions::from_config(&config.upload)
        .with_cancel_token(cancel.clone())
        .with_progress(Arc::new(|event| info!("进度: {:?}", event)));
    if let Some(folder) = folder {
        options.folder = folder;
    }
    if let Some(concurrency) = concurrency {
        options.concurrency = concurrency;
    }

    let uploader = Uploader::new(api, config.upload.clone());
    let upload = async {
        if direct {
            uploader.upload_files_direct(files, options).await
        } else {
            uploader.upload_files_with_queue(files, options).await
        }
    };

    // 🔥 Ctrl+C 取消所有进行中的上传
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl+C，取消上传...");
            ctrl_c_cancel.cancel();
        }
    });

    match upload.await {
        Ok(results) => {
            let out = serde_json::to_string_pretty(&results).context("序列化上传结果失败")?;
            println!("{}", out);
            Ok(())
        }
        Err(e) if e.is_abort() => {
            info!("上传已取消");
            Ok(())
        }
        Err(e) => {
            error!("上传失败: {}", e);
            Err(e.into())
        }
    }
}

async fn run_watch(
    config: &AppConfig,
    api: Arc<ApiClient>,
    profile_id: String,
    profile_type: ProfileType,
) -> anyhow::Result<()> {
    let manager = NotificationManager::from_config(&config.notification, api);
    manager
        .initialize(
            profile_id,
            profile_type,
            Arc::new(|count| println!("未读消息: {}", count)),
        )
        .await;

    tokio::signal::ctrl_c().await.context("监听 Ctrl+C 失败")?;
    info!("收到 Ctrl+C，开始清理...");
    manager.cleanup().await;
    info!("应用已安全退出");

    Ok(())
}
