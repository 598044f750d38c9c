//! domophone 核心服务：装配总线、注册表、下发器与归并器，提供管理面 JSON 接口。

mod handlers;
mod middleware;
mod routes;
mod utils;

use domain::now_epoch_ms;
use domophone_bus::{MqttBus, MqttBusConfig};
use domophone_config::AppConfig;
use domophone_control::{
    AdminService, CommandDispatcher, DispatcherConfig, spawn_pending_sweeper,
};
use domophone_protocol::TopicLayout;
use domophone_reconcile::{
    PresenceWatchdog, Reconciler, ReconcilerConfig, RetryPolicy, seed_registry,
    spawn_dirty_flusher, subscribe_all,
};
use domophone_registry::DeviceRegistry;
use domophone_storage::{PersistenceSink, apply_schema, connect_pool};
use domophone_telemetry::init_tracing;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub admin: AdminService,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 未配置数据库时使用内存存储（重启后历史丢失）
    let sink = match config.database_url.as_deref() {
        Some(url) => {
            let pool = connect_pool(url).await?;
            apply_schema(&pool).await?;
            PersistenceSink::postgres(pool)
        }
        None => {
            warn!(target: "domophone.api", "database_url_missing_using_memory_sink");
            PersistenceSink::in_memory()
        }
    };

    let registry = Arc::new(DeviceRegistry::new());
    seed_registry(&registry, sink.devices.as_ref()).await?;

    let layout = TopicLayout::new(config.topic_prefix.clone());
    let (bus, _eventloop) = MqttBus::connect(MqttBusConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        client_id: config.mqtt_client_id.clone(),
        qos: config.mqtt_qos,
    })?;
    let bus = Arc::new(bus);

    let dispatcher = Arc::new(CommandDispatcher::new(
        registry.clone(),
        bus.clone(),
        sink.commands.clone(),
        layout.clone(),
        DispatcherConfig {
            command_timeout: config.command_timeout(),
            dispatch_max_retries: config.dispatch_max_retries,
            dispatch_backoff_ms: config.dispatch_backoff_ms,
            retention: config.command_retention(),
        },
    ));
    // 重启前下发、已无在途跟踪的过期命令直接终结为 timed_out
    dispatcher.expire_stale_commands(now_epoch_ms()).await?;

    let persist = RetryPolicy {
        max_retries: config.persist_max_retries,
        backoff_ms: config.persist_backoff_ms,
    };
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        dispatcher.clone(),
        sink.clone(),
        layout.clone(),
        ReconcilerConfig {
            persist,
            dedup_cache_size: config.dedup_cache_size,
        },
    ));
    subscribe_all(bus.as_ref(), &layout, reconciler).await?;

    // 后台任务：离线巡检、待补写设备落盘、已终结命令清理
    PresenceWatchdog::new(
        registry.clone(),
        sink.clone(),
        config.offline_grace(),
        persist,
    )
    .spawn(config.presence_check_interval());
    spawn_dirty_flusher(registry.clone(), sink.devices.clone(), config.flush_interval());
    spawn_pending_sweeper(dispatcher.clone(), config.flush_interval());

    let state = AppState {
        admin: AdminService::new(registry, dispatcher, sink),
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(
        target: "domophone.api",
        http_addr = %config.http_addr,
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        topic_prefix = %layout.prefix(),
        "server_started"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
