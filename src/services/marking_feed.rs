//! 阅卷输出 - 业务能力层
//!
//! 按 (试卷, 题目) 汇总已提交的图像：先是固定页（按页码），再是分配到该题的附加页（按入库顺序）。
//! 只输出已推送（committed）的图像。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::assessment::AssessmentStructure;
use crate::models::scan::{ContentHash, ImageId, PageStatus, Rotation, ScannedImage};

/// 图像引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image: ImageId,
    pub bundle: ContentHash,
    pub file_name: String,
    /// 固定页的页码；附加页为 `None`
    pub page: Option<u32>,
    pub rotation: Option<Rotation>,
}

/// 一道题的全部页面
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPages {
    pub paper: u32,
    pub question: u32,
    pub pages: Vec<ImageRef>,
}

/// 阅卷输出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkingFeed {
    pub entries: Vec<QuestionPages>,
}

impl MarkingFeed {
    /// 从图像列表构建；`images` 应按入库顺序排列
    pub fn build(structure: &AssessmentStructure, images: &[ScannedImage]) -> Self {
        // (试卷, 题) -> [(排序键, 引用)]
        let mut grouped: BTreeMap<(u32, u32), Vec<((u8, u32, usize), ImageRef)>> =
            BTreeMap::new();

        for (arrival, image) in images.iter().enumerate() {
            if !image.committed {
                continue;
            }
            match image.status {
                PageStatus::Known => {
                    let Some(identity) = image.identity else {
                        continue;
                    };
                    for question in structure.questions_on_page(identity.page) {
                        grouped
                            .entry((identity.paper, question))
                            .or_default()
                            .push(((0, identity.page, arrival), image_ref(image, Some(identity.page))));
                    }
                }
                PageStatus::Extra => {
                    let Some(dest) = image.extra else {
                        continue;
                    };
                    grouped
                        .entry((dest.paper, dest.question))
                        .or_default()
                        .push(((1, 0, arrival), image_ref(image, None)));
                }
                _ => {}
            }
        }

        let entries = grouped
            .into_iter()
            .map(|((paper, question), mut pages)| {
                pages.sort_by_key(|(key, _)| *key);
                QuestionPages {
                    paper,
                    question,
                    pages: pages.into_iter().map(|(_, r)| r).collect(),
                }
            })
            .collect();

        Self { entries }
    }

    pub fn pages_for(&self, paper: u32, question: u32) -> Option<&[ImageRef]> {
        self.entries
            .iter()
            .find(|e| e.paper == paper && e.question == question)
            .map(|e| e.pages.as_slice())
    }
}

fn image_ref(image: &ScannedImage, page: Option<u32>) -> ImageRef {
    ImageRef {
        image: image.id,
        bundle: image.bundle.clone(),
        file_name: image.file_name.clone(),
        page,
        rotation: image.rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::{ExtraDestination, Identity};

    fn committed(status: PageStatus, order: usize) -> ScannedImage {
        let mut image = ScannedImage::new(
            ContentHash::of(b"bundle"),
            order,
            format!("p{}.png", order),
            format!("{}", order).as_bytes(),
        );
        image.status = status;
        image.committed = true;
        image
    }

    #[test]
    fn test_fixed_pages_then_extras() {
        let structure = AssessmentStructure::new("测试", "123456", 10, 4)
            .with_question(1, vec![2, 3])
            .with_question(2, vec![4]);

        let mut extra = committed(PageStatus::Extra, 1);
        extra.extra = Some(ExtraDestination {
            paper: 7,
            question: 1,
        });
        let mut page3 = committed(PageStatus::Known, 2);
        page3.identity = Some(Identity {
            paper: 7,
            page: 3,
            version: 1,
        });
        let mut page2 = committed(PageStatus::Known, 3);
        page2.identity = Some(Identity {
            paper: 7,
            page: 2,
            version: 1,
        });
        let mut staged_only = committed(PageStatus::Known, 4);
        staged_only.committed = false;
        staged_only.identity = Some(Identity {
            paper: 7,
            page: 4,
            version: 1,
        });

        let feed = MarkingFeed::build(&structure, &[extra.clone(), page3, page2, staged_only]);
        let q1 = feed.pages_for(7, 1).unwrap();
        assert_eq!(q1.len(), 3);
        assert_eq!(q1[0].page, Some(2));
        assert_eq!(q1[1].page, Some(3));
        assert_eq!(q1[2].image, extra.id);
        assert!(feed.pages_for(7, 2).is_none());
    }
}
