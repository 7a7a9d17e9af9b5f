//! 扫描存储 - 基础设施层
//!
//! 保存所有入库的扫描图像和批次记录。图像只会被 `remove_bundle`（管理员清除）删除。

use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::{ReconcileError, ResolveError};
use crate::models::scan::{ContentHash, ImageId, ScannedImage};

/// 批次记录
#[derive(Debug, Clone)]
pub struct BundleRecord {
    pub id: ContentHash,
    pub name: String,
    /// 按批次顺序排列
    pub images: Vec<ImageId>,
    pub staged_at: DateTime<Local>,
    /// 是否至少推送过一次
    pub pushed: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    images: HashMap<ImageId, ScannedImage>,
    bundles: HashMap<ContentHash, BundleRecord>,
    /// 正在入库、尚未写入的批次
    reserved: HashSet<ContentHash>,
}

/// 内存扫描存储
#[derive(Debug, Default)]
pub struct ScanStore {
    inner: RwLock<StoreInner>,
}

impl ScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预留批次哈希；同一哈希已入库或正在入库时失败
    ///
    /// 预留成功后必须以 `insert_bundle` 或 `cancel_reservation` 结束。
    pub async fn reserve_bundle(&self, id: &ContentHash) -> Result<(), ReconcileError> {
        let mut inner = self.inner.write().await;
        if inner.bundles.contains_key(id) || !inner.reserved.insert(id.clone()) {
            return Err(ReconcileError::AlreadyStaged {
                bundle: id.to_string(),
            });
        }
        Ok(())
    }

    /// 放弃预留（取消或失败）
    pub async fn cancel_reservation(&self, id: &ContentHash) {
        self.inner.write().await.reserved.remove(id);
    }

    /// 原子地写入整个批次并结束预留；同一哈希的批次只能入库一次
    pub async fn insert_bundle(
        &self,
        name: String,
        id: ContentHash,
        images: Vec<ScannedImage>,
    ) -> Result<BundleRecord, ReconcileError> {
        let mut inner = self.inner.write().await;
        inner.reserved.remove(&id);
        if inner.bundles.contains_key(&id) {
            return Err(ReconcileError::AlreadyStaged {
                bundle: id.to_string(),
            });
        }

        let record = BundleRecord {
            id: id.clone(),
            name,
            images: images.iter().map(|image| image.id).collect(),
            staged_at: Local::now(),
            pushed: false,
        };
        for image in images {
            inner.images.insert(image.id, image);
        }
        inner.bundles.insert(id, record.clone());
        Ok(record)
    }

    pub async fn get(&self, id: ImageId) -> Option<ScannedImage> {
        self.inner.read().await.images.get(&id).cloned()
    }

    pub async fn bundle(&self, id: &ContentHash) -> Option<BundleRecord> {
        self.inner.read().await.bundles.get(id).cloned()
    }

    pub async fn bundles(&self) -> Vec<BundleRecord> {
        let mut records: Vec<BundleRecord> =
            self.inner.read().await.bundles.values().cloned().collect();
        records.sort_by_key(|r| r.staged_at);
        records
    }

    /// 批次记录及其图像（按批次顺序）
    pub async fn bundle_images(
        &self,
        id: &ContentHash,
    ) -> Option<(BundleRecord, Vec<ScannedImage>)> {
        let inner = self.inner.read().await;
        let record = inner.bundles.get(id)?.clone();
        let images = record
            .images
            .iter()
            .filter_map(|image_id| inner.images.get(image_id).cloned())
            .collect();
        Some((record, images))
    }

    /// 满足条件的图像，按 (批次入库时间, 批次内顺序) 排列
    pub async fn images_where<F>(&self, predicate: F) -> Vec<ScannedImage>
    where
        F: Fn(&ScannedImage) -> bool,
    {
        let inner = self.inner.read().await;
        let mut images: Vec<ScannedImage> = inner
            .images
            .values()
            .filter(|image| predicate(image))
            .cloned()
            .collect();
        images.sort_by_key(|image| {
            let staged_at = inner.bundles.get(&image.bundle).map(|b| b.staged_at);
            (staged_at, image.bundle_order)
        });
        images
    }

    /// 乐观并发更新：只有版本号仍为 `expected_revision` 时才执行
    pub async fn update_if<F>(
        &self,
        id: ImageId,
        expected_revision: u64,
        mutate: F,
    ) -> Result<ScannedImage, ResolveError>
    where
        F: FnOnce(&mut ScannedImage),
    {
        let mut inner = self.inner.write().await;
        let image = inner
            .images
            .get_mut(&id)
            .ok_or(ResolveError::NotFound { image: id })?;
        if image.revision != expected_revision {
            return Err(ResolveError::Stale { image: id });
        }
        mutate(image);
        image.revision += 1;
        Ok(image.clone())
    }

    /// 批量乐观更新：所有图像的版本号都符合预期时才全部执行，否则一张都不改
    pub async fn update_all_if<F>(
        &self,
        expected: &[(ImageId, u64)],
        mut mutate: F,
    ) -> Result<Vec<ScannedImage>, ResolveError>
    where
        F: FnMut(&mut ScannedImage),
    {
        let mut inner = self.inner.write().await;
        for (id, revision) in expected {
            let image = inner
                .images
                .get(id)
                .ok_or(ResolveError::NotFound { image: *id })?;
            if image.revision != *revision {
                return Err(ResolveError::Stale { image: *id });
            }
        }

        let mut updated = Vec::with_capacity(expected.len());
        for (id, _) in expected {
            if let Some(image) = inner.images.get_mut(id) {
                mutate(image);
                image.revision += 1;
                updated.push(image.clone());
            }
        }
        Ok(updated)
    }

    /// 标记可提交的图像为已提交，并把批次标记为已推送；返回本次新提交的数量
    pub async fn mark_committed(&self, bundle: &ContentHash, ids: &[ImageId]) -> usize {
        let mut inner = self.inner.write().await;
        let mut newly = 0;
        for id in ids {
            if let Some(image) = inner.images.get_mut(id) {
                if image.is_committable() && !image.committed {
                    image.committed = true;
                    image.revision += 1;
                    newly += 1;
                }
            }
        }
        if let Some(record) = inner.bundles.get_mut(bundle) {
            record.pushed = true;
        }
        newly
    }

    /// 管理员清除：删除批次及其全部图像
    pub async fn remove_bundle(
        &self,
        id: &ContentHash,
    ) -> Option<(BundleRecord, Vec<ScannedImage>)> {
        let mut inner = self.inner.write().await;
        let record = inner.bundles.remove(id)?;
        let images = record
            .images
            .iter()
            .filter_map(|image_id| inner.images.remove(image_id))
            .collect();
        Some((record, images))
    }
}
