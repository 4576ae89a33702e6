use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler_api::AppState;
use scheduler_core::config::AppConfig;
use scheduler_core::HandlerRegistry;
use scheduler_dispatcher::SchedulingEngine;
use scheduler_infrastructure::{DatabaseManager, MetricsCollector};
use scheduler_worker::{register_builtin_handlers, ExecutorPool};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 主应用程序
///
/// 同一进程内装配调度循环、执行器池和 API 服务，各组件按配置中的 `enabled` 开关启动。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    engine: SchedulingEngine,
    pool: Arc<ExecutorPool>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化存储失败")?;
        database.health_check().await.context("存储健康检查失败")?;

        let engine = SchedulingEngine::new(
            database.task_repository(),
            database.execution_repository(),
            &config.dispatcher,
            &config.worker,
            MetricsCollector::new(),
        );

        let registry = HandlerRegistry::new();
        register_builtin_handlers(&registry).await;
        info!("已注册处理器: {:?}", registry.list_handlers().await);

        let pool = Arc::new(ExecutorPool::new(&engine, registry, &config.worker));

        Ok(Self {
            config,
            database,
            engine,
            pool,
        })
    }

    /// 运行应用程序
    ///
    /// 先完成启动恢复，再启动各组件，直到关闭信号到达且所有组件退出。
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let report = self
            .engine
            .recovery
            .recover_on_startup()
            .await
            .context("启动恢复失败")?;
        info!("启动恢复完成: {:?}", report);

        let mut handles: Vec<(&str, JoinHandle<Result<()>>)> = Vec::new();

        if self.config.dispatcher.enabled {
            let scheduler = Arc::clone(&self.engine.scheduler);
            let rx = shutdown_rx.resubscribe();
            handles.push((
                "scheduler",
                tokio::spawn(async move {
                    scheduler.run(rx).await;
                    Ok(())
                }),
            ));
        }

        if self.config.worker.enabled {
            let pool = Arc::clone(&self.pool);
            let rx = shutdown_rx.resubscribe();
            info!(
                "启动执行器池: {} ({} 个执行器)",
                pool.worker_id(),
                pool.size()
            );
            handles.push((
                "executor-pool",
                tokio::spawn(async move {
                    pool.run(rx).await;
                    Ok(())
                }),
            ));
        }

        if self.config.api.enabled {
            let state = AppState::from_engine(&self.engine);
            let api_config = self.config.api.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push((
                "api",
                tokio::spawn(async move {
                    let result = scheduler_api::serve(state, &api_config, rx).await;
                    if let Err(e) = &result {
                        // 绑定失败时其他组件继续运行，这里立即记录
                        error!("API服务停止: {e:#}");
                    }
                    result
                }),
            ));
        }

        if handles.is_empty() {
            info!("未启用任何组件");
        }

        let mut failed = false;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => info!("组件 {name} 已停止"),
                Ok(Err(_)) => failed = true,
                Err(e) => {
                    error!("组件 {name} 异常退出: {e}");
                    failed = true;
                }
            }
        }

        self.database.close().await;
        info!("存储连接已关闭");

        if failed {
            return Err(anyhow::anyhow!("部分组件运行失败"));
        }
        Ok(())
    }
}
