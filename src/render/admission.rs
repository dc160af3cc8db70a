//! 并发准入控制
//!
//! 全进程同时进行的渲染不超过上限，超出的请求排队等待。
//! 名额由 [`AdmissionPermit`] 持有，无论成功、失败还是取消，释放时都只归还一次。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{RenderError, RenderStage};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
}

/// 准入状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub in_flight: usize,
    pub ceiling: usize,
    pub available: usize,
}

/// 一个渲染名额，drop 时归还
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    /// `ceiling` 至少为 1
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// 等待一个名额
    pub async fn acquire(&self) -> Result<AdmissionPermit, RenderError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RenderError::engine(RenderStage::Admit, e))?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let available = self.semaphore.available_permits();
        AdmissionSnapshot {
            in_flight: self.ceiling.saturating_sub(available),
            ceiling: self.ceiling,
            available,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.snapshot().in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_returned_on_drop() {
        let admission = AdmissionController::new(2);
        let a = admission.acquire().await.unwrap();
        let b = admission.acquire().await.unwrap();
        assert_eq!(admission.in_flight(), 2);
        assert_eq!(admission.snapshot().available, 0);

        drop(a);
        assert_eq!(admission.snapshot().available, 1);
        drop(b);
        assert_eq!(
            admission.snapshot(),
            AdmissionSnapshot {
                in_flight: 0,
                ceiling: 2,
                available: 2
            }
        );
    }

    #[tokio::test]
    async fn test_waiter_is_admitted_after_release() {
        let admission = AdmissionController::new(1);
        let held = admission.acquire().await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(admission.in_flight(), 0);
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        assert_eq!(AdmissionController::new(0).ceiling(), 1);
    }
}
