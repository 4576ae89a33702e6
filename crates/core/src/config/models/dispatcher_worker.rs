use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub schedule_interval_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_interval_seconds: 1,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 执行器标识前缀，每个执行器的标识为 `{worker_id}-{n}`
    pub worker_id: String,
    pub max_concurrent_tasks: usize,
    /// 重试基础退避时间，第 n 次重试等待 `base * 2^n` 秒
    pub retry_backoff_seconds: u64,
    pub max_retry_backoff_seconds: u64,
    /// 取消或超时后等待处理器退出的宽限期
    pub cancel_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: default_worker_id(),
            max_concurrent_tasks: 4,
            retry_backoff_seconds: 1,
            max_retry_backoff_seconds: 300,
            cancel_grace_seconds: 5,
        }
    }
}

fn default_worker_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "worker".to_string())
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.max_retry_backoff_seconds < self.retry_backoff_seconds {
            return Err(anyhow::anyhow!("最大重试退避时间不能小于基础退避时间"));
        }

        Ok(())
    }
}
