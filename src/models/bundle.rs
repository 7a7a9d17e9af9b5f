use serde::{Deserialize, Serialize};

use crate::models::scan::{
    ContentHash, ExtraDestination, Identity, ImageId, PageStatus, Rotation, ScannedImage,
};

/// 批次中的一页原始扫描
#[derive(Debug, Clone)]
pub struct RawPage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl RawPage {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// 一次物理扫描得到的有序页面
#[derive(Debug, Clone)]
pub struct Bundle {
    /// 按页序组合各页哈希得到的批次哈希
    pub id: ContentHash,
    pub name: String,
    pub pages: Vec<RawPage>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, pages: Vec<RawPage>) -> Self {
        let page_hashes: Vec<ContentHash> =
            pages.iter().map(|p| ContentHash::of(&p.bytes)).collect();
        Self {
            id: ContentHash::combine(&page_hashes),
            name: name.into(),
            pages,
        }
    }
}

/// 单页报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub order: usize,
    pub image: ImageId,
    pub file_name: String,
    pub status: PageStatus,
    pub identity: Option<Identity>,
    pub extra: Option<ExtraDestination>,
    pub rotation: Option<Rotation>,
    pub diagnostic: Option<String>,
    pub duplicate_of: Option<ImageId>,
    pub committed: bool,
}

impl From<&ScannedImage> for PageReport {
    fn from(image: &ScannedImage) -> Self {
        Self {
            order: image.bundle_order,
            image: image.id,
            file_name: image.file_name.clone(),
            status: image.status,
            identity: image.identity,
            extra: image.extra,
            rotation: image.rotation,
            diagnostic: image.diagnostic.clone(),
            duplicate_of: image.duplicate_of,
            committed: image.committed,
        }
    }
}

/// 各状态页数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub unscanned: usize,
    pub known: usize,
    pub extra: usize,
    pub unknown: usize,
    pub discarded: usize,
    pub collision: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: PageStatus) {
        match status {
            PageStatus::Unscanned => self.unscanned += 1,
            PageStatus::Known => self.known += 1,
            PageStatus::Extra => self.extra += 1,
            PageStatus::Unknown => self.unknown += 1,
            PageStatus::Discarded => self.discarded += 1,
            PageStatus::Collision => self.collision += 1,
            PageStatus::Error(_) => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unscanned
            + self.known
            + self.extra
            + self.unknown
            + self.discarded
            + self.collision
            + self.error
    }
}

/// 批次报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleReport {
    pub bundle: ContentHash,
    pub name: String,
    pub pages: Vec<PageReport>,
    pub counts: StatusCounts,
    /// 无未知、无冲突、无错误页，可以推送
    pub perfect: bool,
}

impl BundleReport {
    /// 根据当前图像状态生成报告（图像按批次顺序排列）
    pub fn from_images(bundle: ContentHash, name: String, images: &[ScannedImage]) -> Self {
        let mut counts = StatusCounts::default();
        let mut pages: Vec<PageReport> = images
            .iter()
            .map(|image| {
                counts.record(image.status);
                PageReport::from(image)
            })
            .collect();
        pages.sort_by_key(|p| p.order);

        let perfect = counts.unknown == 0 && counts.collision == 0 && counts.error == 0;

        Self {
            bundle,
            name,
            pages,
            counts,
            perfect,
        }
    }
}

/// 推送结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    pub bundle: ContentHash,
    /// 本次新提交的页数
    pub newly_committed: usize,
    /// 之前已经提交过的页数
    pub already_committed: usize,
}
