use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::traits::{HandlerContext, TaskHandler, TaskResult};
use scheduler_core::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    pub args: Option<Vec<String>>,
    /// 工作目录
    pub working_dir: Option<String>,
    /// 环境变量
    pub env_vars: Option<HashMap<String, String>>,
}

/// HTTP任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法
    pub method: Option<String>,
    /// 请求头
    pub headers: Option<HashMap<String, String>>,
    /// 请求体
    pub body: Option<String>,
    /// 超时时间（秒），缺省时使用任务的超时时间
    pub timeout_seconds: Option<u64>,
}

fn parse_params<T: serde::de::DeserializeOwned>(
    ctx: &HandlerContext,
    kind: &str,
) -> SchedulerResult<T> {
    let value = ctx.payload_json()?;
    serde_json::from_value(value)
        .map_err(|e| SchedulerError::InvalidTaskParams(format!("解析{kind}任务参数失败: {e}")))
}

/// Shell任务处理器
///
/// 以子进程方式运行命令，取消或超时时子进程随 future 一起被终止。
#[derive(Debug, Default)]
pub struct ShellHandler;

impl ShellHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for ShellHandler {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Runs a command as a child process"
    }

    async fn execute(&self, ctx: &HandlerContext) -> SchedulerResult<TaskResult> {
        let params: ShellTaskParams = parse_params(ctx, "Shell")?;
        let args = params.args.unwrap_or_default();

        info!(
            "执行Shell任务: execution_id={}, command={}, args={:?}",
            ctx.execution_id, params.command, args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in params.env_vars.unwrap_or_default() {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SchedulerError::HandlerFailure(format!("启动Shell命令失败: {e}")))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| SchedulerError::HandlerFailure(format!("等待进程结束失败: {e}")))?,
            _ = ctx.cancellation.cancelled() => {
                warn!("Shell任务被中断: execution_id={}", ctx.execution_id);
                return Ok(TaskResult::failure("命令已被中断"));
            }
        };

        let exit_code = output.status.code();
        let success = output.status.success();
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        let error_message = if !stderr.is_empty() {
            Some(stderr)
        } else if !success {
            Some(format!("命令执行失败，退出码: {exit_code:?}"))
        } else {
            None
        };

        info!(
            "Shell任务执行完成: execution_id={}, success={}, exit_code={:?}",
            ctx.execution_id, success, exit_code
        );

        Ok(TaskResult {
            success,
            output: (!stdout.is_empty()).then_some(stdout),
            error_message,
            exit_code,
        })
    }
}

/// HTTP任务处理器
#[derive(Debug, Clone, Default)]
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for HttpHandler {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Issues an HTTP request and succeeds on a 2xx response"
    }

    async fn execute(&self, ctx: &HandlerContext) -> SchedulerResult<TaskResult> {
        let params: HttpTaskParams = parse_params(ctx, "HTTP")?;
        let method = params.method.unwrap_or_else(|| "GET".to_string());
        let timeout_seconds = params
            .timeout_seconds
            .unwrap_or(ctx.timeout_seconds.max(1) as u64);

        info!(
            "执行HTTP任务: execution_id={}, method={}, url={}",
            ctx.execution_id, method, params.url
        );

        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&params.url),
            "POST" => self.client.post(&params.url),
            "PUT" => self.client.put(&params.url),
            "DELETE" => self.client.delete(&params.url),
            "PATCH" => self.client.patch(&params.url),
            "HEAD" => self.client.head(&params.url),
            _ => {
                return Err(SchedulerError::InvalidTaskParams(format!(
                    "不支持的HTTP方法: {method}"
                )));
            }
        };

        request_builder = request_builder.timeout(Duration::from_secs(timeout_seconds));
        for (key, value) in params.headers.unwrap_or_default() {
            request_builder = request_builder.header(key, value);
        }
        if let Some(body) = params.body {
            request_builder = request_builder.body(body);
        }

        let response = tokio::select! {
            response = request_builder.send() => response,
            _ = ctx.cancellation.cancelled() => {
                return Ok(TaskResult::failure("HTTP请求已被中断"));
            }
        };

        match response {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let success = response.status().is_success();
                let response_body = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("读取响应体失败: {e}"));

                info!(
                    "HTTP任务执行完成: execution_id={}, success={}, status={}",
                    ctx.execution_id, success, status_code
                );

                Ok(TaskResult {
                    success,
                    output: Some(format!(
                        "HTTP {method} {}\nStatus: {status_code}\nResponse:\n{response_body}",
                        params.url
                    )),
                    error_message: (!success)
                        .then(|| format!("HTTP请求失败，状态码: {status_code}")),
                    exit_code: Some(i32::from(status_code)),
                })
            }
            Err(e) => {
                let error_message = format!("HTTP请求失败: {e}");
                error!(
                    "HTTP任务执行失败: execution_id={}, error={}",
                    ctx.execution_id, error_message
                );
                Ok(TaskResult::failure(error_message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn context(payload: &str) -> HandlerContext {
        HandlerContext {
            execution_id: 1,
            task_id: 1,
            task_name: "handler-test".to_string(),
            payload: payload.to_string(),
            retry_count: 0,
            worker_id: "worker-1".to_string(),
            timeout_seconds: 30,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_shell_handler_rejects_missing_command() {
        let result = ShellHandler::new().execute(&context("")).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTaskParams(_))));

        let result = ShellHandler::new().execute(&context("not json")).await;
        assert!(matches!(result, Err(SchedulerError::Serialization(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_handler_captures_output() {
        let ctx = context(r#"{"command":"echo","args":["hello","world"]}"#);
        let result = ShellHandler::new().execute(&ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hello world"));
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_handler_reports_exit_code() {
        let ctx = context(r#"{"command":"sh","args":["-c","exit 3"]}"#);
        let result = ShellHandler::new().execute(&ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.error_message.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_handler_stops_on_cancellation() {
        let ctx = context(r#"{"command":"sleep","args":["30"]}"#);
        let token = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), ShellHandler::new().execute(&ctx))
            .await
            .expect("handler should stop after cancellation")
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_http_handler_rejects_unknown_method() {
        let ctx = context(r#"{"url":"http://127.0.0.1:1/","method":"BREW"}"#);
        let result = HttpHandler::new().execute(&ctx).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTaskParams(_))));
    }

    #[tokio::test]
    async fn test_http_handler_reports_connection_failure() {
        let ctx = context(r#"{"url":"http://127.0.0.1:1/","timeout_seconds":2}"#);
        let result = HttpHandler::new().execute(&ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("HTTP请求失败"));
    }
}
