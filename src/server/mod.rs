pub mod handlers;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::liveness;
use crate::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// 所有连接共享的只读状态
pub struct AppState {
    pub gateway: Gateway,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            gateway: Gateway::from_config(config)?,
            trust_forwarded_for: config.server.trust_forwarded_for,
        })
    }
}

/// 启动 HTTP 服务器（带优雅关闭）
pub async fn start_server(config: Arc<Config>, addr: SocketAddr) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let listener = TcpListener::bind(addr).await?;
    info!("chatrelay 服务器运行在 http://{}", listener.local_addr()?);
    info!(
        providers = ?state.gateway.registry().ids(),
        default = state.gateway.registry().default_id(),
        "提供商已加载"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let liveness = config.server.public_url.as_deref().map(|url| {
        liveness::spawn(url, config.server.liveness_interval(), shutdown_rx.clone())
    });

    let server_handle = tokio::spawn(serve(listener, state, shutdown_rx));

    wait_for_signal().await;
    let _ = shutdown_tx.send(());

    // 等待服务器处理完现有连接
    info!("等待现有连接处理完成...");
    match server_handle.await {
        Ok(Err(e)) => error!("服务器退出时出错: {}", e),
        Err(e) => error!("等待服务器关闭时出错: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(handle) = liveness {
        if let Err(e) = handle.await {
            error!("等待保活任务退出时出错: {}", e);
        }
    }

    info!("服务器已优雅关闭");
    Ok(())
}

/// 接受连接直到收到关闭信号，然后等待所有连接结束
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // 等待新连接
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);
                let mut conn_shutdown = shutdown.clone();

                connections.spawn(async move {
                    let service = service_fn(move |req| {
                        handlers::handle_request(req, Arc::clone(&state), peer)
                    });

                    let conn = http1::Builder::new().serve_connection(io, service);
                    let mut conn = std::pin::pin!(conn);

                    tokio::select! {
                        result = conn.as_mut() => {
                            if let Err(e) = result {
                                debug!(peer = %peer, "服务连接错误: {}", e);
                            }
                        }
                        _ = conn_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            if let Err(e) = conn.await {
                                debug!(peer = %peer, "关闭连接时出错: {}", e);
                            }
                        }
                    }
                });
            }
            // 回收已结束的连接任务
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!("连接任务异常退出: {}", e);
                }
            }
            // 等待关闭信号
            _ = shutdown.changed() => {
                info!("收到关闭信号，停止接受新连接");
                break;
            }
        }
    }

    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            warn!("连接任务异常退出: {}", e);
        }
    }
    Ok(())
}

/// 等待 SIGINT 或 SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("设置 Ctrl+C 信号处理失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("设置 SIGTERM 信号处理失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("收到 Ctrl+C 信号，开始优雅关闭..."),
        _ = terminate => warn!("收到 SIGTERM 信号，开始优雅关闭..."),
    }
}
