use anyhow::Context;
use chatrelay::config::Config;
use chatrelay::server;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chatrelay")]
#[command(about = "把一条消息转发给上游文本生成服务并流式返回", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "chatrelay.yaml")]
    config: String,

    /// 监听地址，缺省为 0.0.0.0:<端口>
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 解析命令行参数
    let args = Args::parse();

    // 加载配置，环境变量优先
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("无法加载配置文件 {}", args.config))?;
    config.apply_env_overrides()?;

    // 解析监听地址
    let addr: SocketAddr = match &args.bind {
        Some(bind) => bind.parse().with_context(|| format!("无效的监听地址: {}", bind))?,
        None => SocketAddr::from(([0, 0, 0, 0], config.server.port)),
    };

    // 启动服务器
    server::start_server(Arc::new(config), addr).await?;

    Ok(())
}
