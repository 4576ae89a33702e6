//! # 数据模型
//!
//! 定义调度引擎的核心数据结构：任务定义 ([`Task`]) 与执行记录 ([`TaskExecution`])。
//!
//! ## 状态流转
//!
//! 所有状态都是封闭的枚举类型，合法的流转由显式的流转表约束
//! （[`TaskStatus::can_transition_to`] 与 [`ExecutionStatus::can_transition_to`]），
//! 核心组件在写入状态前必须经过流转表校验。
//!
//! ### 任务状态流转
//! ```text
//! Pending ⇄ Paused
//!    ↓ ↑
//! Running → Completed | Failed
//!    ↓
//! (任意) → Cancelled
//! ```
//!
//! ### 执行状态流转
//! ```text
//! Queued → Executing → Success | Failed | TimedOut | Cancelled
//!    ↓
//! Cancelled | Failed
//! ```
//!
//! ## 数据库映射
//!
//! 状态与任务类型在数据库中以大写字符串存储（如 `PENDING`、`EXECUTING`、`CRON`），
//! 可选时间字段统一使用 `Option<DateTime<Utc>>`，不使用零值时间作为哨兵。

pub mod execution;
pub mod task;

pub use execution::*;
pub use task::*;

/// 为以字符串形式存储的枚举实现 SQLite 编解码
macro_rules! impl_sqlite_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                s.parse::<$ty>().map_err(Into::into)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}

impl_sqlite_text_enum!(TaskType);
impl_sqlite_text_enum!(TaskStatus);
impl_sqlite_text_enum!(ExecutionStatus);
