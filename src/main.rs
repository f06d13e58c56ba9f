pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod logging;
pub mod poller;
pub mod provider;
pub mod runtime_config;
pub mod util;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::clock::{Clock, SystemClock};
use crate::credential::{CredentialPool, RequestExecutor};
use crate::generation::{GenerationService, HistoryStore};
use crate::poller::TaskPoller;
use crate::provider::ProviderRegistry;
use crate::runtime_config::RuntimeCredentials;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry =
        Arc::new(ProviderRegistry::from_config(&cfg).context("初始化服务商注册表失败")?);
    tracing::info!("已注册服务商：{}", registry.ids().join(", "));

    // 运行时凭证：可通过 /api/credentials/{provider} 立即替换。
    let credentials = Arc::new(RuntimeCredentials::from_config(&cfg));
    let pool = registry
        .day_boundaries()
        .into_iter()
        .fold(
            CredentialPool::new(credentials.clone(), clock.clone()),
            |pool, (id, boundary)| pool.with_day_boundary(&id, boundary),
        )
        .with_status_file(cfg.credential_status_path());
    for id in registry.ids() {
        let stats = pool.stats(&id);
        tracing::info!(
            provider = %id,
            total = stats.total,
            active = stats.active,
            "凭证池已加载"
        );
    }
    let executor = RequestExecutor::new(Arc::new(pool));

    let store = Arc::new(
        HistoryStore::new(clock.clone())
            .with_file(cfg.history_path())
            .with_ttl_hours(cfg.history_ttl_hours),
    );
    if let Err(e) = store.load().await {
        tracing::warn!("加载 history.json 失败: {e:#}");
    }

    let poller = TaskPoller::new(
        store.clone(),
        registry.clone(),
        executor.clone(),
        clock.clone(),
        Duration::from_secs(cfg.poll_interval_secs),
    );
    poller.start();

    let service = GenerationService::new(registry, executor, store, clock);
    let state = Arc::new(gateway::AppState {
        cfg: cfg.clone(),
        service,
        credentials,
    });
    let app = gateway::router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    poller.stop().await;

    Ok(())
}

fn init_tracing(cfg: &config::Config) {
    // DEBUG 只控制后端请求/响应日志块；常规日志默认把依赖库压在 warn，本项目至少为 info。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,gen2api=info")
    } else if env.contains("gen2api") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},gen2api=info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    // LOG_FORMAT=json 输出结构化日志。
    let _ = if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if cfg.log_level().summary_enabled() {
        tracing::info!("后端请求日志级别：{}", cfg.debug.trim());
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
