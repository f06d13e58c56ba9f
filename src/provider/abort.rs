//! 用户主动取消信号。
//!
//! 取消会以 `ProviderError::Cancelled` 的形式穿过执行器，不会被误判为额度错误。

use crate::error::ProviderError;
use std::future::Future;
use tokio::sync::watch;

/// 取消方持有的句柄；调用 `abort` 后所有关联的 `AbortSignal` 立即触发。
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.0.send(true);
    }

    /// 转为在 drop 时自动取消的守卫（例如 HTTP 客户端断开导致处理器被丢弃）。
    pub fn abort_on_drop(self) -> AbortGuard {
        AbortGuard(Some(self))
    }
}

#[derive(Debug)]
pub struct AbortGuard(Option<AbortHandle>);

impl AbortGuard {
    /// 操作已正常结束，解除守卫。
    pub fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(h) = self.0.take() {
            h.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal(Option<watch::Receiver<bool>>);

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(Some(rx)))
}

impl AbortSignal {
    /// 永不触发的信号。
    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_aborted(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn aborted(&mut self) {
        let Some(rx) = self.0.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // 句柄被丢弃且从未取消：视为永不取消。
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// 在取消信号与操作之间竞速；先取消则丢弃操作并返回 `Cancelled`。
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if self.is_aborted() {
            return Err(ProviderError::Cancelled);
        }
        let mut signal = self.clone();
        tokio::select! {
            biased;
            _ = signal.aborted() => Err(ProviderError::Cancelled),
            res = fut => res,
        }
    }
}
