use serde::{Deserialize, Serialize};

/// 内存存储的 URL
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Database configuration
///
/// `url` 决定使用的存储后端：`memory://` 使用进程内存储，`sqlite:` 开头使用 SQLite。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: MEMORY_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    pub fn store_kind(&self) -> anyhow::Result<StoreKind> {
        if self.url == MEMORY_DATABASE_URL {
            Ok(StoreKind::Memory)
        } else if self.url.starts_with("sqlite:") {
            Ok(StoreKind::Sqlite)
        } else {
            Err(anyhow::anyhow!(
                "不支持的数据库URL: {}，支持 memory:// 或 sqlite:",
                self.url
            ))
        }
    }

    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        self.store_kind()?;

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}
