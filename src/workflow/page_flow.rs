//! 页面处理流程 - 流程层
//!
//! 核心职责：定义"一页"的读码与分类流程
//!
//! 流程顺序：
//! 1. 入库：生成图像 ID 和内容哈希，状态为未扫描
//! 2. 读码：四个角解码 + 旋转推断
//! 3. 分类：得出状态与归一化身份
//!
//! 认领不在这里做：认领需要按批次顺序串行执行，由编排层负责。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::infrastructure::ClaimSnapshot;
use crate::models::bundle::RawPage;
use crate::models::scan::{PageStatus, ScannedImage};
use crate::services::{CodeReader, PageClassifier};
use crate::workflow::page_ctx::PageCtx;

/// 页面处理流程
///
/// - 不持有任何共享可变状态
/// - CPU 密集，适合放进 `spawn_blocking`
pub struct PageFlow {
    reader: CodeReader,
    classifier: PageClassifier,
    verbose_logging: bool,
}

impl PageFlow {
    pub fn new(reader: CodeReader, classifier: PageClassifier, verbose_logging: bool) -> Self {
        Self {
            reader,
            classifier,
            verbose_logging,
        }
    }

    /// 处理一页，返回尚未认领的扫描图像
    pub fn run(&self, raw: &RawPage, ctx: &PageCtx, snapshot: &ClaimSnapshot) -> ScannedImage {
        let mut image = ScannedImage::new(
            ctx.bundle.clone(),
            ctx.order,
            raw.file_name.clone(),
            &raw.bytes,
        );

        let reading = self.reader.read_bytes(&raw.bytes);
        if self.verbose_logging {
            debug!(
                "{} 读到 {} 个码, 旋转 {:?}",
                ctx,
                reading.slots.iter().flatten().count(),
                reading.rotation
            );
        }

        let classification = self
            .classifier
            .classify(&reading.slots, reading.rotation, snapshot);

        image.codes = reading.slots;
        image.rotation = reading.rotation.rotation();
        image.status = classification.status;
        image.identity = classification.identity;

        let mut diagnostics = reading.diagnostics;
        diagnostics.extend(classification.diagnostic);
        image.diagnostic = (!diagnostics.is_empty()).then(|| diagnostics.join("; "));

        self.log_result(ctx, &image);
        image
    }

    fn log_result(&self, ctx: &PageCtx, image: &ScannedImage) {
        let detail = image.diagnostic.as_deref().unwrap_or("");
        match image.status {
            PageStatus::Known => {
                if let Some(position) = image.position() {
                    info!("{} ✓ 识别为 {}", ctx, position);
                }
            }
            PageStatus::Extra => info!("{} 📎 附加页（待分配题目）", ctx),
            PageStatus::Error(kind) => warn!("{} ❌ {:?}: {}", ctx, kind, detail),
            status => warn!("{} ⚠️ {} {}", ctx, status, detail),
        }
    }

    /// 处理任务异常时的兜底：页面记为未知
    pub fn fallback(raw: &RawPage, ctx: &PageCtx, reason: &str) -> ScannedImage {
        let mut image = ScannedImage::new(
            ctx.bundle.clone(),
            ctx.order,
            raw.file_name.clone(),
            &raw.bytes,
        );
        image.status = PageStatus::Unknown;
        image.diagnostic = Some(reason.to_string());
        warn!("{} ⚠️ 读码任务异常，记为未知: {}", ctx, reason);
        image
    }
}

/// 共享的页面流程
pub type SharedPageFlow = Arc<PageFlow>;
