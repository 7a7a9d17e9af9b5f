//! 页面分类服务 - 业务能力层
//!
//! 把 0-4 个已解码的码、试卷结构和认领表快照变成一个页面状态。
//! 纯函数：相同输入永远得到相同结果，不写任何共享状态。

use std::sync::Arc;

use crate::codec::{DecodedCode, IdentityCode};
use crate::infrastructure::ClaimSnapshot;
use crate::models::assessment::AssessmentStructure;
use crate::models::scan::{CornerSlots, ErrorKind, Identity, ImageId, PageStatus, RotationReading};

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: PageStatus,
    /// 未知页和未分配的附加页没有身份
    pub identity: Option<Identity>,
    pub diagnostic: Option<String>,
    /// 快照中该位置的当前持有者（仅供报告参考，是否冲突由认领结果决定）
    pub slot_holder: Option<ImageId>,
}

impl Classification {
    fn unknown(diagnostic: Option<String>) -> Self {
        Self {
            status: PageStatus::Unknown,
            identity: None,
            diagnostic,
            slot_holder: None,
        }
    }

    fn error(kind: ErrorKind, identity: Option<Identity>, diagnostic: String) -> Self {
        Self {
            status: PageStatus::Error(kind),
            identity,
            diagnostic: Some(diagnostic),
            slot_holder: None,
        }
    }
}

/// 页面分类器
#[derive(Debug, Clone)]
pub struct PageClassifier {
    structure: Arc<AssessmentStructure>,
}

impl PageClassifier {
    pub fn new(structure: Arc<AssessmentStructure>) -> Self {
        Self { structure }
    }

    /// 分类
    ///
    /// 判定顺序：
    /// 1. 没有码 → 未知
    /// 2. 公开码不符 → 错误(错卷)
    /// 3. 多个码互相矛盾（含草稿码与页码混用）→ 错误(码不一致)
    /// 4. 旋转无法确定 → 未知
    /// 5. 全部是草稿码 → 附加页（待分配）
    /// 6. 试卷号/页码越界 → 错误(越界)
    /// 7. 版本相符 → 已识别，否则 → 错误(版本不符)
    pub fn classify(
        &self,
        slots: &CornerSlots,
        rotation: RotationReading,
        snapshot: &ClaimSnapshot,
    ) -> Classification {
        let structure = &self.structure;
        let codes: Vec<&DecodedCode> = slots.iter().flatten().collect();

        if codes.is_empty() {
            return Classification::unknown(None);
        }

        let page_codes: Vec<&IdentityCode> = codes
            .iter()
            .filter_map(|code| match code {
                DecodedCode::Page(identity) => Some(identity),
                DecodedCode::Scrap { .. } => None,
            })
            .collect();

        if let Some(foreign) = page_codes
            .iter()
            .find(|code| code.public_code != structure.public_code)
        {
            return Classification::error(
                ErrorKind::WrongAssessment,
                None,
                format!(
                    "公开码 {} 与本次考试 {} 不符，可能混入了其他试卷",
                    foreign.public_code, structure.public_code
                ),
            );
        }

        if !page_codes.is_empty() && page_codes.len() != codes.len() {
            return Classification::error(
                ErrorKind::InconsistentCode,
                None,
                "同一页上同时出现草稿码和试卷码".to_string(),
            );
        }

        if let Some(first) = page_codes.first() {
            if let Some(other) = page_codes.iter().find(|code| !code.same_page_as(first)) {
                return Classification::error(
                    ErrorKind::InconsistentCode,
                    None,
                    format!(
                        "各角的码不一致: 试卷{}/第{}页/版本{} 与 试卷{}/第{}页/版本{}",
                        first.paper, first.page, first.version, other.paper, other.page,
                        other.version
                    ),
                );
            }
        }

        if rotation == RotationReading::Ambiguous {
            return Classification::unknown(Some(
                "各角的码给出的旋转方向不一致".to_string(),
            ));
        }

        let Some(first) = page_codes.first() else {
            // 只有草稿码
            return Classification {
                status: PageStatus::Extra,
                identity: None,
                diagnostic: None,
                slot_holder: None,
            };
        };

        let identity = Identity {
            paper: first.paper,
            page: first.page,
            version: first.version,
        };
        let position = identity.position();

        if !structure.paper_in_range(identity.paper) || !structure.page_in_range(identity.page) {
            return Classification::error(
                ErrorKind::OutOfRange,
                Some(identity),
                format!(
                    "{} 超出范围 (共 {} 份, 每份 {} 页)",
                    position, structure.number_of_papers, structure.pages_per_paper
                ),
            );
        }

        match structure.expected_version(position) {
            Some(expected) if expected == identity.version => {
                let slot_holder = snapshot.get(position);
                Classification {
                    status: PageStatus::Known,
                    identity: Some(identity),
                    diagnostic: slot_holder
                        .map(|holder| format!("{} 当前由图像 {} 持有", position, holder)),
                    slot_holder,
                }
            }
            Some(expected) => Classification::error(
                ErrorKind::WrongVersion,
                Some(identity),
                format!(
                    "{} 应为版本 {}，读到版本 {}",
                    position, expected, identity.version
                ),
            ),
            // 范围已校验，不会走到这里；按附加页处理
            None => Classification {
                status: PageStatus::Extra,
                identity: None,
                diagnostic: Some(format!("{} 不是固定页", position)),
                slot_holder: None,
            },
        }
    }
}
