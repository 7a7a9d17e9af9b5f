#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use scan_reconcile::codec::{self, Corner};
use scan_reconcile::infrastructure::ClaimSnapshot;
use scan_reconcile::models::{Bundle, RawPage, Rotation};
use scan_reconcile::services::PageClassifier;
use scan_reconcile::{
    AssessmentStructure, BundleReconciler, ClaimOutcome, ClaimStore, CodeReader, ImageId,
    MemoryClaimTable, PageFlow, PagePosition, PageStatus, ScanStore, SymbolDecoder,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PUBLIC_CODE: &str = "123456";
pub const FOREIGN_CODE: &str = "654321";
pub const PAGE_SIZE: u32 = 40;

/// 码本：每个码字符串对应一个灰度值，测试页面用灰度"印"码
#[derive(Clone, Default)]
pub struct CodeBook {
    inner: Arc<Mutex<HashMap<u8, String>>>,
}

impl CodeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 码对应的灰度；同一个码总是同一个灰度，0 表示空白
    pub fn level_for(&self, code: &str) -> u8 {
        let mut levels = self.inner.lock().unwrap();
        if let Some((&level, _)) = levels.iter().find(|(_, c)| c.as_str() == code) {
            return level;
        }
        let level = u8::try_from(levels.len() + 1).expect("code book full");
        levels.insert(level, code.to_string());
        level
    }

    pub fn decoder(&self) -> BookDecoder {
        BookDecoder { book: self.clone() }
    }
}

/// 读取角区域中心像素的灰度，查码本
pub struct BookDecoder {
    book: CodeBook,
}

impl SymbolDecoder for BookDecoder {
    fn decode_region(&self, region: &GrayImage) -> Vec<String> {
        let level = region.get_pixel(region.width() / 2, region.height() / 2).0[0];
        self.book
            .inner
            .lock()
            .unwrap()
            .get(&level)
            .cloned()
            .into_iter()
            .collect()
    }
}

/// 10 份试卷，每份 3 页；第 1 题在 1-2 页，第 2 题在第 3 页；试卷 5 的第 2 页是版本 2
pub fn structure() -> AssessmentStructure {
    AssessmentStructure::new("期中考试", PUBLIC_CODE, 10, 3)
        .with_versions(2)
        .with_question(1, vec![1, 2])
        .with_question(2, vec![3])
        .with_paper_versions(5, vec![1, 2, 1])
}

pub fn reconciler(book: &CodeBook) -> BundleReconciler {
    BundleReconciler::in_memory(structure(), CodeReader::new(book.decoder(), 0.5), false)
}

/// 使用指定认领表的对账器
pub fn reconciler_with(book: &CodeBook, claims: Arc<dyn ClaimStore>) -> BundleReconciler {
    let structure = Arc::new(structure());
    let classifier = PageClassifier::new(structure.clone());
    let flow = Arc::new(PageFlow::new(
        CodeReader::new(book.decoder(), 0.5),
        classifier,
        false,
    ));
    BundleReconciler::new(structure, claims, Arc::new(ScanStore::new()), flow)
}

/// 第一次认领之后停顿一段时间的认领表，用来拉开并发入库的窗口
pub struct SlowFirstClaim {
    inner: MemoryClaimTable,
    pause: Duration,
    paused: AtomicBool,
}

impl SlowFirstClaim {
    pub fn new(pause: Duration) -> Self {
        Self {
            inner: MemoryClaimTable::new(),
            pause,
            paused: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClaimStore for SlowFirstClaim {
    async fn claim(&self, key: PagePosition, by: ImageId) -> ClaimOutcome {
        let outcome = self.inner.claim(key, by).await;
        if !self.paused.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(self.pause).await;
        }
        outcome
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
        self.inner.compare_and_set(key, expected, new).await
    }

    async fn snapshot(&self) -> ClaimSnapshot {
        self.inner.snapshot().await
    }
}

/// 认领表与图像状态一致：每个认领都指向该位置上的已识别图像，
/// 每个已识别图像都持有自己的位置
pub async fn assert_claims_consistent(reconciler: &BundleReconciler) {
    let snapshot = reconciler.claims().snapshot().await;
    for (slot, holder) in snapshot.iter() {
        let image = reconciler
            .store()
            .get(*holder)
            .await
            .unwrap_or_else(|| panic!("{} 的持有者 {} 不存在", slot, holder));
        assert_eq!(image.status, PageStatus::Known, "{} 的持有者状态", slot);
        assert_eq!(image.position(), Some(*slot));
    }

    for image in reconciler
        .store()
        .images_where(|image| image.status == PageStatus::Known)
        .await
    {
        let position = image.position().unwrap();
        assert_eq!(snapshot.get(position), Some(image.id), "{} 的认领", position);
    }
}

/// 按物理角涂灰度；`variant` 写在左上角像素上，让内容哈希不同而读码结果不变
pub fn page_png(levels: [u8; 4], variant: u8) -> Vec<u8> {
    let half = PAGE_SIZE / 2;
    let mut image = GrayImage::from_pixel(PAGE_SIZE, PAGE_SIZE, Luma([0]));
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let corner = match (x >= half, y >= half) {
            (true, false) => Corner::TopRight,
            (false, false) => Corner::TopLeft,
            (false, true) => Corner::BottomLeft,
            (true, true) => Corner::BottomRight,
        };
        *pixel = Luma([levels[corner.slot()]]);
    }
    image.put_pixel(0, 0, Luma([variant]));

    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// 把逻辑角上的码按旋转放到物理角
fn printed(
    book: &CodeBook,
    codes: [Option<String>; 4],
    rotation: Rotation,
    variant: u8,
) -> Vec<u8> {
    let mut levels = [0u8; 4];
    for logical in Corner::ALL {
        if let Some(code) = &codes[logical.slot()] {
            let physical = logical.turned_ccw(rotation.quarter_turns());
            levels[physical.slot()] = book.level_for(code);
        }
    }
    page_png(levels, variant)
}

/// 固定页的四个角码（按逻辑角）
pub fn fixed_codes(paper: u32, page: u32, version: u32, public_code: &str) -> [Option<String>; 4] {
    Corner::ALL.map(|corner| Some(codec::encode(paper, page, version, corner, public_code).unwrap()))
}

pub fn fixed_page(book: &CodeBook, paper: u32, page: u32, version: u32, variant: u8) -> RawPage {
    let codes = fixed_codes(paper, page, version, PUBLIC_CODE);
    RawPage::new(
        format!("p{}-{}-{}.png", paper, page, variant),
        printed(book, codes, Rotation::Deg0, variant),
    )
}

/// 旋转并缺一个角（订书钉）的固定页
pub fn rotated_page(
    book: &CodeBook,
    paper: u32,
    page: u32,
    rotation: Rotation,
    missing: Corner,
) -> RawPage {
    let mut codes = fixed_codes(paper, page, 1, PUBLIC_CODE);
    codes[missing.slot()] = None;
    RawPage::new(
        format!("rot{}-{}-{}.png", rotation.degrees(), paper, page),
        printed(book, codes, rotation, 0),
    )
}

pub fn foreign_page(book: &CodeBook, paper: u32, page: u32) -> RawPage {
    let codes = fixed_codes(paper, page, 1, FOREIGN_CODE);
    RawPage::new(
        format!("foreign-{}-{}.png", paper, page),
        printed(book, codes, Rotation::Deg0, 0),
    )
}

pub fn scrap_page(book: &CodeBook, variant: u8) -> RawPage {
    let codes = Corner::ALL.map(|corner| Some(codec::encode_scrap(corner)));
    RawPage::new(
        format!("scrap-{}.png", variant),
        printed(book, codes, Rotation::Deg0, variant),
    )
}

pub fn blank_page(variant: u8) -> RawPage {
    RawPage::new(format!("blank-{}.png", variant), page_png([0; 4], variant))
}

pub fn bundle(name: &str, pages: Vec<RawPage>) -> Bundle {
    Bundle::new(name, pages)
}
