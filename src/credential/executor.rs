//! 带凭证故障转移的请求执行器。

use crate::credential::pool::CredentialPool;
use crate::credential::types::Credential;
use crate::error::ProviderError;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RequestExecutor {
    pool: Arc<CredentialPool>,
}

impl RequestExecutor {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// 执行一次服务商操作，遇到额度耗尽信号时自动切换到下一个凭证。
    ///
    /// - 未配置凭证：匿名执行一次，结果原样返回。
    /// - 最多尝试 `凭证数 + 1` 次，各次严格串行。
    /// - 取消与非额度错误立即返回，不重试、不标记凭证。
    pub async fn execute<T, F, Fut>(&self, provider_id: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(Option<Credential>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let count = self.pool.credential_count(provider_id);
        if count == 0 {
            return op(None).await;
        }

        let max_attempts = count + 1;
        let mut last_err: Option<ProviderError> = None;

        for attempt in 1..=max_attempts {
            let Some(credential) = self.pool.next_available(provider_id) else {
                return Err(ProviderError::QuotaExhausted {
                    provider: provider_id.to_string(),
                });
            };

            tracing::debug!(
                provider = provider_id,
                attempt,
                credential = %credential,
                "执行服务商请求"
            );

            match op(Some(credential.clone())).await {
                Ok(v) => return Ok(v),
                Err(ProviderError::Quota(msg)) => {
                    tracing::info!(
                        provider = provider_id,
                        attempt,
                        credential = %credential,
                        "凭证额度耗尽：{msg}"
                    );
                    self.pool.mark_exhausted(provider_id, &credential);
                    last_err = Some(ProviderError::Quota(msg));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(ProviderError::QuotaExhausted {
            provider: provider_id.to_string(),
        }))
    }

    /// 单次执行，不做故障转移也不标记任何凭证（用于任务状态查询）。
    pub async fn execute_once<T, F, Fut>(&self, provider_id: &str, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(Option<Credential>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        op(self.pool.first_for_status_check(provider_id)).await
    }
}
