//! 异常页面裁决 - 人工处理层
//!
//! 操作员通过这里处理未知、冲突、错误和待分配的附加页。
//! 每个操作都是"读取 → 校验 → 提交"：提交时重新检查图像版本号和认领表，
//! 期间有任何变化都返回 `Stale`，由操作员刷新后重试，不会持锁等待人工决策。

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::infrastructure::{ClaimStore, ScanStore};
use crate::models::assessment::AssessmentStructure;
use crate::models::scan::{
    ContentHash, ExtraDestination, Identity, ImageId, PagePosition, PageStatus, ScannedImage,
};
use crate::orchestrator::BundleReconciler;

/// 人工指定的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// 固定页位置
    Fixed { paper: u32, page: u32 },
    /// 附加到某份试卷的某道题
    Extra { paper: u32, question: u32 },
}

/// 冲突裁决中落选图像的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoserPolicy {
    RevertToUnknown,
    Discard,
}

/// 待处理页面视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub image: ImageId,
    pub bundle: ContentHash,
    pub order: usize,
    pub file_name: String,
    pub status: PageStatus,
    pub identity: Option<Identity>,
    pub diagnostic: Option<String>,
    /// 提交时需要原样带回
    pub revision: u64,
}

impl From<&ScannedImage> for PageView {
    fn from(image: &ScannedImage) -> Self {
        Self {
            image: image.id,
            bundle: image.bundle.clone(),
            order: image.bundle_order,
            file_name: image.file_name.clone(),
            status: image.status,
            identity: image.identity,
            diagnostic: image.diagnostic.clone(),
            revision: image.revision,
        }
    }
}

/// 一个位置上的冲突
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollisionView {
    pub slot: PagePosition,
    /// 当前占位图像；提交裁决时需要原样带回
    pub holder: Option<ImageId>,
    /// 被标记为冲突的图像
    pub contenders: Vec<PageView>,
}

/// 异常页面裁决器
#[derive(Clone)]
pub struct ExceptionResolver {
    structure: Arc<AssessmentStructure>,
    claims: Arc<dyn ClaimStore>,
    store: Arc<ScanStore>,
}

impl ExceptionResolver {
    pub fn new(
        structure: Arc<AssessmentStructure>,
        claims: Arc<dyn ClaimStore>,
        store: Arc<ScanStore>,
    ) -> Self {
        Self {
            structure,
            claims,
            store,
        }
    }

    /// 与对账器共享认领表和存储
    pub fn for_reconciler(reconciler: &BundleReconciler) -> Self {
        Self::new(
            reconciler.structure().clone(),
            reconciler.claims().clone(),
            reconciler.store().clone(),
        )
    }

    // ========== 查询 ==========

    pub async fn list_unknown(&self) -> Vec<PageView> {
        self.list_where(|image| image.status == PageStatus::Unknown)
            .await
    }

    pub async fn list_errors(&self) -> Vec<PageView> {
        self.list_where(|image| matches!(image.status, PageStatus::Error(_)))
            .await
    }

    /// 尚未分配题目的附加页
    pub async fn list_unassigned_extra(&self) -> Vec<PageView> {
        self.list_where(|image| image.status == PageStatus::Extra && image.extra.is_none())
            .await
    }

    async fn list_where<F>(&self, predicate: F) -> Vec<PageView>
    where
        F: Fn(&ScannedImage) -> bool,
    {
        self.store
            .images_where(predicate)
            .await
            .iter()
            .map(PageView::from)
            .collect()
    }

    /// 按位置分组的冲突，附带每个位置的当前持有者
    pub async fn list_collisions(&self) -> Vec<CollisionView> {
        let mut grouped: BTreeMap<PagePosition, Vec<PageView>> = BTreeMap::new();
        for image in self
            .store
            .images_where(|image| image.status == PageStatus::Collision)
            .await
        {
            if let Some(position) = image.position() {
                grouped
                    .entry(position)
                    .or_default()
                    .push(PageView::from(&image));
            }
        }

        let mut views = Vec::with_capacity(grouped.len());
        for (slot, contenders) in grouped {
            views.push(CollisionView {
                slot,
                holder: self.claims.read(slot).await,
                contenders,
            });
        }
        views
    }

    // ========== 裁决 ==========

    /// 未知页 → 已识别 / 附加页
    pub async fn resolve_unknown(
        &self,
        image: ImageId,
        revision: u64,
        destination: Destination,
    ) -> Result<ScannedImage, ResolveError> {
        let current = self.fetch(image, revision).await?;
        require_status(&current, |s| s == PageStatus::Unknown)?;

        match destination {
            Destination::Fixed { paper, page } => self.assign_fixed(image, revision, paper, page).await,
            Destination::Extra { paper, question } => {
                self.assign_extra_unchecked(image, revision, paper, question)
                    .await
            }
        }
    }

    /// 为附加页指定题目（包括改派已分配的附加页）
    pub async fn assign_extra(
        &self,
        image: ImageId,
        revision: u64,
        paper: u32,
        question: u32,
    ) -> Result<ScannedImage, ResolveError> {
        let current = self.fetch(image, revision).await?;
        require_status(&current, |s| s == PageStatus::Extra)?;
        self.assign_extra_unchecked(image, revision, paper, question)
            .await
    }

    async fn assign_fixed(
        &self,
        image: ImageId,
        revision: u64,
        paper: u32,
        page: u32,
    ) -> Result<ScannedImage, ResolveError> {
        let slot = PagePosition::new(paper, page);
        let version = self.structure.expected_version(slot).ok_or_else(|| {
            ResolveError::invalid_destination(format!("{} 超出试卷结构范围", slot))
        })?;

        match self.claims.compare_and_set(slot, None, Some(image)).await {
            Ok(()) => {}
            Err(Some(holder)) if holder == image => {}
            Err(Some(holder)) => return Err(ResolveError::AlreadyClaimed { slot, holder }),
            Err(None) => return Err(ResolveError::Stale { image }),
        }

        let result = self
            .store
            .update_if(image, revision, |scanned| {
                scanned.status = PageStatus::Known;
                scanned.identity = Some(Identity {
                    paper,
                    page,
                    version,
                });
                scanned.extra = None;
                scanned.duplicate_of = None;
                scanned.committed = false;
                scanned.diagnostic = Some("人工指定位置".to_string());
            })
            .await;

        match result {
            Ok(updated) => {
                info!("🛠️ 图像 {} 人工指定为 {}", image, slot);
                Ok(updated)
            }
            Err(e) => {
                self.claims.release(slot, image).await;
                Err(e)
            }
        }
    }

    async fn assign_extra_unchecked(
        &self,
        image: ImageId,
        revision: u64,
        paper: u32,
        question: u32,
    ) -> Result<ScannedImage, ResolveError> {
        if !self.structure.paper_in_range(paper) {
            return Err(ResolveError::invalid_destination(format!(
                "试卷 {} 超出范围",
                paper
            )));
        }
        if !self.structure.has_question(question) {
            return Err(ResolveError::invalid_destination(format!(
                "题目 {} 不存在",
                question
            )));
        }

        let updated = self
            .store
            .update_if(image, revision, |scanned| {
                scanned.status = PageStatus::Extra;
                scanned.identity = None;
                scanned.extra = Some(ExtraDestination { paper, question });
                scanned.committed = false;
            })
            .await?;
        info!("📎 图像 {} 分配为试卷 {} 第 {} 题的附加页", image, paper, question);
        Ok(updated)
    }

    /// 任何非已识别页 → 已丢弃
    pub async fn discard(&self, image: ImageId, revision: u64) -> Result<ScannedImage, ResolveError> {
        let current = self.fetch(image, revision).await?;
        require_status(&current, |s| {
            !matches!(s, PageStatus::Known | PageStatus::Discarded)
        })?;

        let updated = self
            .store
            .update_if(image, revision, |scanned| {
                scanned.status = PageStatus::Discarded;
                scanned.committed = false;
            })
            .await?;
        info!("🗑️ 图像 {} 已丢弃", image);
        Ok(updated)
    }

    /// 已丢弃 → 未知
    pub async fn undiscard(
        &self,
        image: ImageId,
        revision: u64,
    ) -> Result<ScannedImage, ResolveError> {
        let current = self.fetch(image, revision).await?;
        require_status(&current, |s| s == PageStatus::Discarded)?;

        let updated = self
            .store
            .update_if(image, revision, |scanned| {
                scanned.status = PageStatus::Unknown;
                scanned.identity = None;
                scanned.extra = None;
                scanned.duplicate_of = None;
            })
            .await?;
        info!("↩️ 图像 {} 恢复为未知", image);
        Ok(updated)
    }

    /// 冲突裁决：选定一张图像占据该位置，其余按 `losers` 处理
    ///
    /// `expected_holder` 是操作员看到的持有者。认领表以比较并交换提交（保留原持有者时只做校验），
    /// 图像状态按裁决开始时读到的版本号整体提交；任何一步发现变化都撤回认领并返回 `Stale`。
    /// 原持有者落选时一并撤销提交。
    pub async fn resolve_collision(
        &self,
        slot: PagePosition,
        expected_holder: Option<ImageId>,
        winner: ImageId,
        losers: LoserPolicy,
    ) -> Result<(), ResolveError> {
        let contenders = self
            .store
            .images_where(|image| {
                image.status == PageStatus::Collision && image.position() == Some(slot)
            })
            .await;

        if contenders.is_empty() {
            if self.claims.read(slot).await != expected_holder {
                return Err(ResolveError::Stale { image: winner });
            }
            return Err(ResolveError::invalid_destination(format!(
                "{} 上没有冲突",
                slot
            )));
        }
        let keep_holder = expected_holder == Some(winner);
        if !keep_holder && !contenders.iter().any(|c| c.id == winner) {
            return Err(ResolveError::invalid_destination(format!(
                "图像 {} 不是 {} 的竞争者",
                winner, slot
            )));
        }

        let mut expected: Vec<(ImageId, u64)> =
            contenders.iter().map(|c| (c.id, c.revision)).collect();
        if let Some(holder) = expected_holder {
            let current = self
                .store
                .get(holder)
                .await
                .ok_or(ResolveError::Stale { image: holder })?;
            expected.push((holder, current.revision));
        }

        if let Err(actual) = self
            .claims
            .compare_and_set(slot, expected_holder, Some(winner))
            .await
        {
            debug!("{} 持有者已变为 {:?}，裁决过期", slot, actual);
            return Err(ResolveError::Stale { image: winner });
        }

        let result = self
            .store
            .update_all_if(&expected, |scanned| {
                if scanned.id == winner {
                    apply_winner(scanned);
                } else {
                    apply_loser(scanned, losers);
                }
            })
            .await;

        if let Err(e) = result {
            if !keep_holder
                && self
                    .claims
                    .compare_and_set(slot, Some(winner), expected_holder)
                    .await
                    .is_err()
            {
                warn!("⚠️ {} 认领撤回失败，位置已被再次修改", slot);
            }
            return Err(match e {
                ResolveError::NotFound { image } => ResolveError::Stale { image },
                other => other,
            });
        }

        warn!(
            "⚖️ {} 冲突已裁决: 图像 {} 胜出，{} 张落选 ({:?})",
            slot,
            winner,
            expected.len() - 1,
            losers
        );
        Ok(())
    }

    /// 读取图像并校验版本号
    async fn fetch(&self, image: ImageId, revision: u64) -> Result<ScannedImage, ResolveError> {
        let current = self
            .store
            .get(image)
            .await
            .ok_or(ResolveError::NotFound { image })?;
        if current.revision != revision {
            return Err(ResolveError::Stale { image });
        }
        Ok(current)
    }
}

fn require_status<F>(image: &ScannedImage, allowed: F) -> Result<(), ResolveError>
where
    F: Fn(PageStatus) -> bool,
{
    if allowed(image.status) {
        Ok(())
    } else {
        Err(ResolveError::InvalidTransition {
            image: image.id,
            status: image.status.to_string(),
        })
    }
}

fn apply_winner(scanned: &mut ScannedImage) {
    if scanned.status != PageStatus::Known {
        scanned.committed = false;
    }
    scanned.status = PageStatus::Known;
    scanned.duplicate_of = None;
    scanned.diagnostic = Some("冲突裁决胜出".to_string());
}

fn apply_loser(scanned: &mut ScannedImage, policy: LoserPolicy) {
    scanned.status = match policy {
        LoserPolicy::RevertToUnknown => PageStatus::Unknown,
        LoserPolicy::Discard => PageStatus::Discarded,
    };
    scanned.identity = None;
    scanned.duplicate_of = None;
    scanned.committed = false;
    scanned.diagnostic = Some("冲突裁决落选".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{ClaimOutcome, ClaimSnapshot, MemoryClaimTable};
    use async_trait::async_trait;
    use std::time::Duration;

    /// 每次比较并交换之后停顿，拉开并发裁决之间的窗口
    struct SlowClaims {
        inner: MemoryClaimTable,
        pause: Duration,
    }

    #[async_trait]
    impl ClaimStore for SlowClaims {
        async fn claim(&self, key: PagePosition, by: ImageId) -> ClaimOutcome {
            self.inner.claim(key, by).await
        }

        async fn release(&self, key: PagePosition, by: ImageId) -> bool {
            self.inner.release(key, by).await
        }

        async fn read(&self, key: PagePosition) -> Option<ImageId> {
            self.inner.read(key).await
        }

        async fn compare_and_set(
            &self,
            key: PagePosition,
            expected: Option<ImageId>,
            new: Option<ImageId>,
        ) -> Result<(), Option<ImageId>> {
            let result = self.inner.compare_and_set(key, expected, new).await;
            tokio::time::sleep(self.pause).await;
            result
        }

        async fn snapshot(&self) -> ClaimSnapshot {
            self.inner.snapshot().await
        }
    }

    fn structure() -> Arc<AssessmentStructure> {
        Arc::new(
            AssessmentStructure::new("期中", "123456", 10, 3)
                .with_question(1, vec![1, 2])
                .with_question(2, vec![3]),
        )
    }

    async fn setup(images: Vec<ScannedImage>) -> (ExceptionResolver, Arc<dyn ClaimStore>) {
        setup_with(images, Arc::new(MemoryClaimTable::new())).await
    }

    async fn setup_with(
        images: Vec<ScannedImage>,
        claims: Arc<dyn ClaimStore>,
    ) -> (ExceptionResolver, Arc<dyn ClaimStore>) {
        let store = Arc::new(ScanStore::new());
        let bundle = ContentHash::of(b"bundle");
        store
            .insert_bundle("b".into(), bundle, images)
            .await
            .unwrap();
        (
            ExceptionResolver::new(structure(), claims.clone(), store),
            claims,
        )
    }

    fn unknown(order: usize) -> ScannedImage {
        let mut image = ScannedImage::new(
            ContentHash::of(b"bundle"),
            order,
            format!("p{}.png", order),
            format!("page-{}", order).as_bytes(),
        );
        image.status = PageStatus::Unknown;
        image
    }

    #[tokio::test]
    async fn test_resolve_unknown_to_fixed_claims_slot() {
        let image = unknown(1);
        let id = image.id;
        let (resolver, claims) = setup(vec![image]).await;

        let views = resolver.list_unknown().await;
        assert_eq!(views.len(), 1);

        let updated = resolver
            .resolve_unknown(id, views[0].revision, Destination::Fixed { paper: 4, page: 2 })
            .await
            .unwrap();
        assert_eq!(updated.status, PageStatus::Known);
        assert_eq!(claims.read(PagePosition::new(4, 2)).await, Some(id));
        assert!(resolver.list_unknown().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_rejects_taken_slot_and_bad_destination() {
        let image = unknown(1);
        let id = image.id;
        let (resolver, claims) = setup(vec![image]).await;
        let other = ImageId::new();
        claims.claim(PagePosition::new(4, 2), other).await;

        let taken = resolver
            .resolve_unknown(id, 0, Destination::Fixed { paper: 4, page: 2 })
            .await;
        assert_eq!(
            taken.unwrap_err(),
            ResolveError::AlreadyClaimed {
                slot: PagePosition::new(4, 2),
                holder: other
            }
        );

        let out_of_range = resolver
            .resolve_unknown(id, 0, Destination::Fixed { paper: 4, page: 9 })
            .await;
        assert!(matches!(
            out_of_range,
            Err(ResolveError::InvalidDestination { .. })
        ));

        let no_question = resolver
            .resolve_unknown(id, 0, Destination::Extra { paper: 4, question: 7 })
            .await;
        assert!(matches!(
            no_question,
            Err(ResolveError::InvalidDestination { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_revision_is_rejected() {
        let image = unknown(1);
        let id = image.id;
        let (resolver, claims) = setup(vec![image]).await;

        resolver.discard(id, 0).await.unwrap();
        let stale = resolver
            .resolve_unknown(id, 0, Destination::Fixed { paper: 1, page: 1 })
            .await;
        assert_eq!(stale.unwrap_err(), ResolveError::Stale { image: id });
        assert_eq!(claims.read(PagePosition::new(1, 1)).await, None);
    }

    #[tokio::test]
    async fn test_discard_and_undiscard() {
        let image = unknown(1);
        let id = image.id;
        let (resolver, _) = setup(vec![image]).await;

        let discarded = resolver.discard(id, 0).await.unwrap();
        assert_eq!(discarded.status, PageStatus::Discarded);
        assert!(matches!(
            resolver.discard(id, discarded.revision).await,
            Err(ResolveError::InvalidTransition { .. })
        ));

        let restored = resolver.undiscard(id, discarded.revision).await.unwrap();
        assert_eq!(restored.status, PageStatus::Unknown);
    }

    #[tokio::test]
    async fn test_known_page_cannot_be_discarded() {
        let mut image = unknown(1);
        image.status = PageStatus::Known;
        let id = image.id;
        let (resolver, _) = setup(vec![image]).await;

        assert!(matches!(
            resolver.discard(id, 0).await,
            Err(ResolveError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_assign_extra() {
        let mut image = unknown(1);
        image.status = PageStatus::Extra;
        let id = image.id;
        let (resolver, _) = setup(vec![image]).await;

        assert_eq!(resolver.list_unassigned_extra().await.len(), 1);
        let updated = resolver.assign_extra(id, 0, 3, 2).await.unwrap();
        assert_eq!(
            updated.extra,
            Some(ExtraDestination {
                paper: 3,
                question: 2
            })
        );
        assert!(resolver.list_unassigned_extra().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_collision_replaces_holder() {
        let slot = PagePosition::new(2, 1);
        let identity = Some(Identity {
            paper: 2,
            page: 1,
            version: 1,
        });

        let mut holder = unknown(1);
        holder.status = PageStatus::Known;
        holder.identity = identity;
        holder.committed = true;
        let mut contender = unknown(2);
        contender.status = PageStatus::Collision;
        contender.identity = identity;
        let (holder_id, contender_id) = (holder.id, contender.id);

        let (resolver, claims) = setup(vec![holder, contender]).await;
        claims.claim(slot, holder_id).await;

        let views = resolver.list_collisions().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].holder, Some(holder_id));

        // 持有者已变化：过期
        let stale = resolver
            .resolve_collision(slot, None, contender_id, LoserPolicy::Discard)
            .await;
        assert_eq!(stale.unwrap_err(), ResolveError::Stale { image: contender_id });

        resolver
            .resolve_collision(slot, Some(holder_id), contender_id, LoserPolicy::Discard)
            .await
            .unwrap();
        assert_eq!(claims.read(slot).await, Some(contender_id));
        assert!(resolver.list_collisions().await.is_empty());

        let old = resolver.store.get(holder_id).await.unwrap();
        assert_eq!(old.status, PageStatus::Discarded);
        assert!(!old.committed);
    }

    /// 同一位置上一个已提交的持有者和一个冲突图像
    fn holder_and_contender(slot: PagePosition) -> (ScannedImage, ScannedImage) {
        let identity = Some(Identity {
            paper: slot.paper,
            page: slot.page,
            version: 1,
        });
        let mut holder = unknown(1);
        holder.status = PageStatus::Known;
        holder.identity = identity;
        holder.committed = true;
        let mut contender = unknown(2);
        contender.status = PageStatus::Collision;
        contender.identity = identity;
        (holder, contender)
    }

    #[tokio::test]
    async fn test_concurrent_verdicts_leave_exactly_one_winner() {
        let slot = PagePosition::new(2, 1);
        let (holder, contender) = holder_and_contender(slot);
        let (holder_id, contender_id) = (holder.id, contender.id);
        let slow: Arc<dyn ClaimStore> = Arc::new(SlowClaims {
            inner: MemoryClaimTable::new(),
            pause: Duration::from_millis(100),
        });
        let (resolver, claims) = setup_with(vec![holder, contender], slow).await;
        claims.claim(slot, holder_id).await;

        let keep = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver
                    .resolve_collision(slot, Some(holder_id), holder_id, LoserPolicy::RevertToUnknown)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let pick = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver
                    .resolve_collision(
                        slot,
                        Some(holder_id),
                        contender_id,
                        LoserPolicy::RevertToUnknown,
                    )
                    .await
            })
        };

        let results = [keep.await.unwrap(), pick.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ResolveError::Stale { .. }))));

        let winner = claims.read(slot).await.unwrap();
        let loser = if winner == holder_id {
            contender_id
        } else {
            holder_id
        };
        assert_eq!(
            resolver.store.get(winner).await.unwrap().status,
            PageStatus::Known
        );
        assert_eq!(
            resolver.store.get(loser).await.unwrap().status,
            PageStatus::Unknown
        );
        assert!(resolver.list_collisions().await.is_empty());
    }

    #[tokio::test]
    async fn test_verdict_on_moved_contender_rolls_back_claim() {
        let slot = PagePosition::new(3, 2);
        let (holder, contender) = holder_and_contender(slot);
        let (holder_id, contender_id) = (holder.id, contender.id);
        let slow: Arc<dyn ClaimStore> = Arc::new(SlowClaims {
            inner: MemoryClaimTable::new(),
            pause: Duration::from_millis(100),
        });
        let (resolver, claims) = setup_with(vec![holder, contender], slow).await;
        claims.claim(slot, holder_id).await;

        let verdict = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver
                    .resolve_collision(slot, Some(holder_id), contender_id, LoserPolicy::Discard)
                    .await
            })
        };

        // 认领已交换、状态尚未提交时，竞争者被别处改动
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(claims.read(slot).await, Some(contender_id));
        resolver
            .store
            .update_if(contender_id, 0, |scanned| {
                scanned.diagnostic = Some("重新检查".to_string());
            })
            .await
            .unwrap();

        assert_eq!(
            verdict.await.unwrap().unwrap_err(),
            ResolveError::Stale {
                image: contender_id
            }
        );
        assert_eq!(claims.read(slot).await, Some(holder_id));
        let kept = resolver.store.get(holder_id).await.unwrap();
        assert_eq!(kept.status, PageStatus::Known);
        assert!(kept.committed);
        assert_eq!(
            resolver.store.get(contender_id).await.unwrap().status,
            PageStatus::Collision
        );
    }
}
