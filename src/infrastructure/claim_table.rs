//! 认领表 - 基础设施层
//!
//! 全局唯一的共享可变状态：(试卷, 页) → 认领该位置的图像。
//! 对外只暴露原子操作，任何 worker 都拿不到底层的 map。

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::scan::{ImageId, PagePosition};

/// 认领结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// 位置空闲，认领成功
    Claimed,
    /// 位置已经是本图像的
    AlreadyHeld,
    /// 位置被其他图像占用
    HeldBy(ImageId),
}

/// 认领表只读快照
#[derive(Debug, Clone, Default)]
pub struct ClaimSnapshot {
    claims: HashMap<PagePosition, ImageId>,
}

impl ClaimSnapshot {
    pub fn get(&self, key: PagePosition) -> Option<ImageId> {
        self.claims.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PagePosition, &ImageId)> {
        self.claims.iter()
    }
}

impl From<HashMap<PagePosition, ImageId>> for ClaimSnapshot {
    fn from(claims: HashMap<PagePosition, ImageId>) -> Self {
        Self { claims }
    }
}

/// 认领表
///
/// 每个操作都是针对单个键的原子、可串行化操作；冲突立即失败，不会阻塞等待。
/// 可以用内存 map 实现，也可以用带唯一约束的关系表实现。
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// 尝试认领位置
    async fn claim(&self, key: PagePosition, by: ImageId) -> ClaimOutcome;

    /// 释放位置；只有当前持有者能释放
    async fn release(&self, key: PagePosition, by: ImageId) -> bool;

    /// 读取当前持有者
    async fn read(&self, key: PagePosition) -> Option<ImageId>;

    /// 比较并交换：当前持有者等于 `expected` 时替换为 `new`，
    /// 否则返回实际持有者
    async fn compare_and_set(
        &self,
        key: PagePosition,
        expected: Option<ImageId>,
        new: Option<ImageId>,
    ) -> Result<(), Option<ImageId>>;

    /// 整表快照
    async fn snapshot(&self) -> ClaimSnapshot;
}

/// 内存认领表
#[derive(Debug, Default)]
pub struct MemoryClaimTable {
    claims: RwLock<HashMap<PagePosition, ImageId>>,
}

impl MemoryClaimTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimTable {
    async fn claim(&self, key: PagePosition, by: ImageId) -> ClaimOutcome {
        let mut claims = self.claims.write().await;
        match claims.get(&key) {
            Some(holder) if *holder == by => ClaimOutcome::AlreadyHeld,
            Some(holder) => ClaimOutcome::HeldBy(*holder),
            None => {
                claims.insert(key, by);
                debug!("认领 {} -> {}", key, by);
                ClaimOutcome::Claimed
            }
        }
    }

    async fn release(&self, key: PagePosition, by: ImageId) -> bool {
        let mut claims = self.claims.write().await;
        if claims.get(&key) == Some(&by) {
            claims.remove(&key);
            debug!("释放 {} (原持有者 {})", key, by);
            true
        } else {
            false
        }
    }

    async fn read(&self, key: PagePosition) -> Option<ImageId> {
        self.claims.read().await.get(&key).copied()
    }

    async fn compare_and_set(
        &self,
        key: PagePosition,
        expected: Option<ImageId>,
        new: Option<ImageId>,
    ) -> Result<(), Option<ImageId>> {
        let mut claims = self.claims.write().await;
        let current = claims.get(&key).copied();
        if current != expected {
            return Err(current);
        }
        match new {
            Some(id) => {
                claims.insert(key, id);
            }
            None => {
                claims.remove(&key);
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> ClaimSnapshot {
        ClaimSnapshot::from(self.claims.read().await.clone())
    }
}
