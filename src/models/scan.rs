use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::codec::DecodedCode;

/// 扫描图像 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 内容哈希（十六进制）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// 计算字节内容的哈希
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// 按顺序组合多个哈希
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.0.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志显示用的短哈希
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 认领表的键：(试卷号, 页码)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PagePosition {
    pub paper: u32,
    pub page: u32,
}

impl PagePosition {
    pub fn new(paper: u32, page: u32) -> Self {
        Self { paper, page }
    }
}

impl fmt::Display for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "试卷{}/第{}页", self.paper, self.page)
    }
}

/// 归一化后的页面身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub paper: u32,
    pub page: u32,
    pub version: u32,
}

impl Identity {
    pub fn position(&self) -> PagePosition {
        PagePosition::new(self.paper, self.page)
    }
}

/// 附加页的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtraDestination {
    pub paper: u32,
    pub question: u32,
}

/// 错误子类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// 公开码不属于本次考试（混入了别的试卷堆）
    WrongAssessment,
    /// 同一页上的多个码互相矛盾
    InconsistentCode,
    /// 试卷号/页码超出范围
    OutOfRange,
    /// 版本与预期不符（印刷批次错误）
    WrongVersion,
}

/// 页面状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageStatus {
    Unscanned,
    Known,
    Extra,
    Unknown,
    Discarded,
    Collision,
    Error(ErrorKind),
}

impl PageStatus {
    /// 是否阻止批次推送
    pub fn blocks_push(&self) -> bool {
        matches!(
            self,
            PageStatus::Unknown | PageStatus::Collision | PageStatus::Error(_)
        )
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Unscanned => write!(f, "未扫描"),
            PageStatus::Known => write!(f, "已识别"),
            PageStatus::Extra => write!(f, "附加页"),
            PageStatus::Unknown => write!(f, "未知"),
            PageStatus::Discarded => write!(f, "已丢弃"),
            PageStatus::Collision => write!(f, "冲突"),
            PageStatus::Error(kind) => write!(f, "错误({:?})", kind),
        }
    }
}

/// 图像相对正向页面逆时针转过的角度
///
/// 顺时针转回同样角度即可摆正。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn quarter_turns(self) -> u8 {
        self as u8
    }

    pub fn from_quarter_turns(turns: u8) -> Self {
        Self::ALL[(turns % 4) as usize]
    }

    pub fn degrees(self) -> u16 {
        u16::from(self.quarter_turns()) * 90
    }
}

/// 旋转推断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationReading {
    /// 所有码一致指向同一个旋转
    Known(Rotation),
    /// 没有读到任何码
    NoCodes,
    /// 各个码给出的旋转互相矛盾
    Ambiguous,
}

impl RotationReading {
    pub fn rotation(&self) -> Option<Rotation> {
        match self {
            RotationReading::Known(rotation) => Some(*rotation),
            _ => None,
        }
    }
}

/// 四个物理角各一个槽位，按 `Corner::slot()` 索引
pub type CornerSlots = [Option<DecodedCode>; 4];

/// 扫描图像
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedImage {
    pub id: ImageId,
    /// 所属批次（批次内容哈希）
    pub bundle: ContentHash,
    /// 在批次内的顺序（从 1 开始）
    pub bundle_order: usize,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub codes: CornerSlots,
    pub rotation: Option<Rotation>,
    pub status: PageStatus,
    pub identity: Option<Identity>,
    pub extra: Option<ExtraDestination>,
    pub diagnostic: Option<String>,
    /// 冲突时，占位图像与本图内容完全相同
    pub duplicate_of: Option<ImageId>,
    /// 是否已随批次推送
    pub committed: bool,
    /// 每次状态变化递增，用于乐观并发校验
    pub revision: u64,
}

impl ScannedImage {
    /// 入库时创建，尚未读码
    pub fn new(bundle: ContentHash, bundle_order: usize, file_name: String, bytes: &[u8]) -> Self {
        Self {
            id: ImageId::new(),
            bundle,
            bundle_order,
            file_name,
            content_hash: ContentHash::of(bytes),
            codes: Default::default(),
            rotation: None,
            status: PageStatus::Unscanned,
            identity: None,
            extra: None,
            diagnostic: None,
            duplicate_of: None,
            committed: false,
            revision: 0,
        }
    }

    pub fn position(&self) -> Option<PagePosition> {
        self.identity.map(|identity| identity.position())
    }

    /// 推送时应提交：已识别页，或已分配题目的附加页
    pub fn is_committable(&self) -> bool {
        match self.status {
            PageStatus::Known => true,
            PageStatus::Extra => self.extra.is_some(),
            _ => false,
        }
    }
}
