//! 单个批次处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责把一个批次（一次物理扫描得到的有序页面）作为一个整体处理。
//!
//! ## 核心功能
//!
//! 1. **入库（stage）**：先预留批次哈希，再每页一个阻塞任务读码 + 分类，最后按批次顺序串行认领
//! 2. **冲突标记**：位置已被其他图像占用时降级为冲突，内容完全相同也不例外
//! 3. **推送（push）**：逐个位置提交，整批要么全部成功要么回滚；重复推送无副作用
//! 4. **报告**：随时从存储重新生成，能反映人工处理后的状态
//! 5. **清除**：管理员删除整个批次并释放其认领
//!
//! 认领只在这里和 `resolver` 中发生，流程层拿到的只是快照。

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::ReconcileError;
use crate::infrastructure::{ClaimOutcome, ClaimStore, MemoryClaimTable, ScanStore};
use crate::models::assessment::AssessmentStructure;
use crate::models::bundle::{Bundle, BundleReport, PushSummary, RawPage};
use crate::models::scan::{ContentHash, ImageId, PagePosition, PageStatus, ScannedImage};
use crate::services::{CodeReader, MarkingFeed, PageClassifier, ReviewWriter};
use crate::workflow::{PageCtx, PageFlow, SharedPageFlow};

/// 取消标志；置为 true 后正在入库的批次放弃全部结果
pub type CancelFlag = Arc<AtomicBool>;

/// 新建一个未触发的取消标志
pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

/// 单张试卷的收集进度
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PaperProgress {
    pub paper: u32,
    /// 已推送提交的页码
    pub committed: Vec<u32>,
    /// 已认领但尚未推送的页码
    pub claimed: Vec<u32>,
    /// 还没有任何图像认领的页码
    pub missing: Vec<u32>,
    /// 已提交的附加页数量
    pub extras: usize,
}

impl PaperProgress {
    pub fn is_complete(&self) -> bool {
        self.claimed.is_empty() && self.missing.is_empty()
    }
}

/// 单个批次的处理结果（供批量处理器汇总）
#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub report: BundleReport,
    pub push: Option<PushSummary>,
}

/// 批次对账器
///
/// 克隆代价很低：内部全部是 `Arc`，多个批次任务共享同一张认领表和同一个存储。
#[derive(Clone)]
pub struct BundleReconciler {
    structure: Arc<AssessmentStructure>,
    claims: Arc<dyn ClaimStore>,
    store: Arc<ScanStore>,
    flow: SharedPageFlow,
}

impl BundleReconciler {
    pub fn new(
        structure: Arc<AssessmentStructure>,
        claims: Arc<dyn ClaimStore>,
        store: Arc<ScanStore>,
        flow: SharedPageFlow,
    ) -> Self {
        Self {
            structure,
            claims,
            store,
            flow,
        }
    }

    /// 使用内存认领表和内存存储创建
    pub fn in_memory(structure: AssessmentStructure, reader: CodeReader, verbose: bool) -> Self {
        let structure = Arc::new(structure);
        let classifier = PageClassifier::new(structure.clone());
        let flow = Arc::new(PageFlow::new(reader, classifier, verbose));
        Self::new(
            structure,
            Arc::new(MemoryClaimTable::new()),
            Arc::new(ScanStore::new()),
            flow,
        )
    }

    pub fn structure(&self) -> &Arc<AssessmentStructure> {
        &self.structure
    }

    pub fn claims(&self) -> &Arc<dyn ClaimStore> {
        &self.claims
    }

    pub fn store(&self) -> &Arc<ScanStore> {
        &self.store
    }

    /// 入库一个批次
    pub async fn stage(&self, bundle: Bundle) -> Result<BundleReport, ReconcileError> {
        self.stage_with_cancel(bundle, cancel_flag()).await
    }

    /// 入库一个批次，可中途取消
    ///
    /// 取消后不写入任何图像，也不保留任何认领。
    pub async fn stage_with_cancel(
        &self,
        bundle: Bundle,
        cancel: CancelFlag,
    ) -> Result<BundleReport, ReconcileError> {
        let Bundle { id, name, pages } = bundle;

        if let Err(e) = self.store.reserve_bundle(&id).await {
            warn!("[批次 {}] ⚠️ 内容哈希 {} 已入库，跳过", name, id.short());
            return Err(e);
        }

        let staged = self.stage_reserved(&id, &name, pages, &cancel).await;
        if staged.is_err() {
            self.store.cancel_reservation(&id).await;
        }
        let report = staged?;
        log_bundle_staged(&report);
        Ok(report)
    }

    /// 已预留批次哈希后的入库过程；出错时由调用方释放预留
    async fn stage_reserved(
        &self,
        id: &ContentHash,
        name: &str,
        pages: Vec<RawPage>,
        cancel: &CancelFlag,
    ) -> Result<BundleReport, ReconcileError> {
        log_bundle_start(name, id, pages.len());

        let mut images = self.read_pages(id, name, pages, cancel).await?;
        let claimed = self.claim_known(name, &mut images).await;

        if cancel.load(Ordering::SeqCst) {
            self.release_all(&claimed).await;
            info!("[批次 {}] 🛑 已取消，认领已释放", name);
            return Err(ReconcileError::Cancelled {
                bundle: id.to_string(),
            });
        }

        let record = match self
            .store
            .insert_bundle(name.to_string(), id.clone(), images)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.release_all(&claimed).await;
                return Err(e);
            }
        };

        self.report(&record.id).await
    }

    /// 读码 + 分类：每页一个阻塞任务，结果保持批次顺序
    async fn read_pages(
        &self,
        id: &ContentHash,
        name: &str,
        pages: Vec<RawPage>,
        cancel: &CancelFlag,
    ) -> Result<Vec<ScannedImage>, ReconcileError> {
        let snapshot = Arc::new(self.claims.snapshot().await);
        let total = pages.len();

        let tasks = pages.into_iter().enumerate().map(|(index, raw)| {
            let raw = Arc::new(raw);
            let ctx = PageCtx::new(id.clone(), name.to_string(), index + 1, total);
            let flow = self.flow.clone();
            let snapshot = snapshot.clone();
            let cancel = cancel.clone();
            let task_raw = raw.clone();
            let task_ctx = ctx.clone();

            let handle = tokio::task::spawn_blocking(move || {
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                Some(flow.run(&task_raw, &task_ctx, &snapshot))
            });

            async move { (raw, ctx, handle.await) }
        });

        let mut images = Vec::with_capacity(total);
        for (raw, ctx, joined) in join_all(tasks).await {
            match joined {
                Ok(Some(image)) => images.push(image),
                Ok(None) => {
                    info!("{} 🛑 取消，未读码", ctx);
                    return Err(ReconcileError::Cancelled {
                        bundle: id.to_string(),
                    });
                }
                Err(e) => images.push(PageFlow::fallback(&raw, &ctx, &e.to_string())),
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(ReconcileError::Cancelled {
                bundle: id.to_string(),
            });
        }
        Ok(images)
    }

    /// 按批次顺序为已识别页认领位置，失败的降级为冲突
    async fn claim_known(
        &self,
        name: &str,
        images: &mut [ScannedImage],
    ) -> Vec<(PagePosition, ImageId)> {
        let mut claimed = Vec::new();

        for index in 0..images.len() {
            if images[index].status != PageStatus::Known {
                continue;
            }
            let Some(position) = images[index].position() else {
                continue;
            };
            let id = images[index].id;

            match self.claims.claim(position, id).await {
                ClaimOutcome::Claimed | ClaimOutcome::AlreadyHeld => claimed.push((position, id)),
                ClaimOutcome::HeldBy(holder) => {
                    let holder_hash = match images[..index].iter().find(|i| i.id == holder) {
                        Some(earlier) => Some(earlier.content_hash.clone()),
                        None => self.store.get(holder).await.map(|i| i.content_hash),
                    };
                    let image = &mut images[index];
                    let duplicate = holder_hash.as_ref() == Some(&image.content_hash);

                    image.status = PageStatus::Collision;
                    image.duplicate_of = duplicate.then_some(holder);
                    let note = if duplicate {
                        format!("{} 已被内容完全相同的图像 {} 认领（疑似重复扫描）", position, holder)
                    } else {
                        format!("{} 已被图像 {} 认领", position, holder)
                    };
                    image.diagnostic = Some(match image.diagnostic.take() {
                        Some(previous) => format!("{}; {}", previous, note),
                        None => note,
                    });
                    warn!(
                        "[批次 {} 第 {} 页] ⚔️ 冲突: {}",
                        name,
                        image.bundle_order,
                        image.diagnostic.as_deref().unwrap_or("")
                    );
                }
            }
        }

        claimed
    }

    async fn release_all(&self, claimed: &[(PagePosition, ImageId)]) {
        for (position, id) in claimed {
            self.claims.release(*position, *id).await;
        }
    }

    /// 从存储重新生成批次报告
    pub async fn report(&self, bundle: &ContentHash) -> Result<BundleReport, ReconcileError> {
        let (record, images) =
            self.store
                .bundle_images(bundle)
                .await
                .ok_or_else(|| ReconcileError::UnknownBundle {
                    bundle: bundle.to_string(),
                })?;
        Ok(BundleReport::from_images(record.id, record.name, &images))
    }

    /// 所有批次的报告，按入库时间排列
    pub async fn reports(&self) -> Vec<BundleReport> {
        let mut reports = Vec::new();
        for record in self.store.bundles().await {
            if let Ok(report) = self.report(&record.id).await {
                reports.push(report);
            }
        }
        reports
    }

    /// 推送批次
    ///
    /// 逐个位置确认认领；任何一个位置被别人占走，就释放本次新认领的位置并整体失败。
    /// 重复推送不会重复认领，第二次推送新提交数为 0。
    pub async fn push(&self, bundle: &ContentHash) -> Result<PushSummary, ReconcileError> {
        let (record, images) =
            self.store
                .bundle_images(bundle)
                .await
                .ok_or_else(|| ReconcileError::UnknownBundle {
                    bundle: bundle.to_string(),
                })?;

        let report = BundleReport::from_images(record.id.clone(), record.name.clone(), &images);
        if !report.perfect {
            warn!("[批次 {}] ⛔ 尚有待处理页面，不能推送", record.name);
            return Err(ReconcileError::NotPerfect {
                bundle: bundle.to_string(),
                unknown: report.counts.unknown,
                collision: report.counts.collision,
                error: report.counts.error,
            });
        }

        let committable: Vec<&ScannedImage> =
            images.iter().filter(|image| image.is_committable()).collect();

        let mut newly_claimed = Vec::new();
        for image in &committable {
            if image.status != PageStatus::Known {
                continue;
            }
            let Some(position) = image.position() else {
                continue;
            };
            match self.claims.claim(position, image.id).await {
                ClaimOutcome::Claimed => newly_claimed.push((position, image.id)),
                ClaimOutcome::AlreadyHeld => {}
                ClaimOutcome::HeldBy(holder) => {
                    self.release_all(&newly_claimed).await;
                    error!(
                        "[批次 {}] ❌ 推送回滚: {} 已被图像 {} 占用",
                        record.name, position, holder
                    );
                    return Err(ReconcileError::ClaimLost {
                        slot: position,
                        holder,
                    });
                }
            }
        }

        let already_committed = committable.iter().filter(|image| image.committed).count();
        let ids: Vec<ImageId> = committable.iter().map(|image| image.id).collect();
        let newly_committed = self.store.mark_committed(bundle, &ids).await;

        info!(
            "[批次 {}] 📤 推送完成: 新提交 {}, 之前已提交 {}",
            record.name, newly_committed, already_committed
        );

        Ok(PushSummary {
            bundle: bundle.clone(),
            newly_committed,
            already_committed,
        })
    }

    /// 管理员清除批次：删除全部图像并释放它们持有的认领，返回删除的页数
    pub async fn purge_bundle(&self, bundle: &ContentHash) -> Result<usize, ReconcileError> {
        let (record, images) =
            self.store
                .remove_bundle(bundle)
                .await
                .ok_or_else(|| ReconcileError::UnknownBundle {
                    bundle: bundle.to_string(),
                })?;

        let mut released = 0;
        for image in &images {
            if let Some(position) = image.position() {
                if self.claims.release(position, image.id).await {
                    released += 1;
                }
            }
        }

        warn!(
            "[批次 {}] 🗑️ 已清除 {} 页，释放认领 {} 个",
            record.name,
            images.len(),
            released
        );
        Ok(images.len())
    }

    /// 单张试卷的收集进度；试卷号超出范围时返回 None
    pub async fn paper_progress(&self, paper: u32) -> Option<PaperProgress> {
        if !self.structure.paper_in_range(paper) {
            return None;
        }

        let mut progress = PaperProgress {
            paper,
            committed: Vec::new(),
            claimed: Vec::new(),
            missing: Vec::new(),
            extras: 0,
        };

        for page in 1..=self.structure.pages_per_paper {
            let position = PagePosition::new(paper, page);
            match self.claims.read(position).await {
                None => progress.missing.push(page),
                Some(holder) => match self.store.get(holder).await {
                    Some(image) if image.committed => progress.committed.push(page),
                    _ => progress.claimed.push(page),
                },
            }
        }

        progress.extras = self
            .store
            .images_where(|image| {
                image.committed
                    && image.status == PageStatus::Extra
                    && image.extra.map(|dest| dest.paper) == Some(paper)
            })
            .await
            .len();

        Some(progress)
    }

    /// 交给阅卷方的已提交页面清单
    pub async fn marking_feed(&self) -> MarkingFeed {
        let committed = self.store.images_where(|image| image.committed).await;
        MarkingFeed::build(&self.structure, &committed)
    }
}

/// 处理单个批次：入库 → 记录待处理页 → （可选）推送
///
/// # 参数
/// - `reconciler`: 批次对账器
/// - `bundle`: 批次数据
/// - `bundle_index`: 批次索引（用于日志）
/// - `auto_push`: 完美批次是否自动推送
/// - `review_writer`: 待处理页面记录
pub async fn process_bundle(
    reconciler: &BundleReconciler,
    bundle: Bundle,
    bundle_index: usize,
    auto_push: bool,
    review_writer: &ReviewWriter,
) -> Result<BundleOutcome, ReconcileError> {
    info!("[批次 #{}] 开始处理: {}", bundle_index, bundle.name);

    let report = reconciler.stage(bundle).await?;

    for page in report.pages.iter().filter(|p| p.status.blocks_push()) {
        if let Err(e) = review_writer.write(&report.name, page) {
            error!("[批次 {}] 写入待处理页面失败: {}", report.name, e);
        }
    }

    let push = if auto_push && report.perfect {
        Some(reconciler.push(&report.bundle).await?)
    } else {
        None
    };

    let report = if push.is_some() {
        reconciler.report(&report.bundle).await?
    } else {
        report
    };

    log_bundle_complete(bundle_index, &report, push.is_some());
    Ok(BundleOutcome { report, push })
}

// ========== 日志辅助函数 ==========

fn log_bundle_start(name: &str, id: &ContentHash, page_count: usize) {
    info!("[批次 {}] 开始入库", name);
    info!("[批次 {}] 哈希: {}", name, id.short());
    info!("[批次 {}] 页面总数: {}", name, page_count);
}

fn log_bundle_staged(report: &BundleReport) {
    let counts = &report.counts;
    info!(
        "[批次 {}] 页面统计: 识别 {}, 附加 {}, 未知 {}, 冲突 {}, 错误 {}, 总计 {}",
        report.name,
        counts.known,
        counts.extra,
        counts.unknown,
        counts.collision,
        counts.error,
        counts.total()
    );
}

fn log_bundle_complete(bundle_index: usize, report: &BundleReport, pushed: bool) {
    if report.perfect {
        let state = if pushed { "已推送" } else { "待推送" };
        info!("\n[批次 #{}] ✅ {} 处理完成（{}）\n", bundle_index, report.name, state);
    } else {
        warn!(
            "\n[批次 #{}] ⚠️ {} 有待人工处理的页面，暂不推送\n",
            bundle_index, report.name
        );
    }
}
