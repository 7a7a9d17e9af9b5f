use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::codec::identity::{PAPER_WIDTH, PAGE_WIDTH, PUBLIC_CODE_WIDTH};
use crate::error::{AppResult, ConfigError};
use crate::models::scan::PagePosition;

/// 题目及其所在页
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    /// 题号（从 1 开始）
    pub index: u32,
    pub pages: Vec<u32>,
}

/// 单份试卷各页的版本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperVersions {
    pub paper: u32,
    /// 第 i 个元素是第 i+1 页的版本
    pub versions: Vec<u32>,
}

/// 页面用途
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    /// 学生信息页
    Id,
    /// 不阅页
    DoNotMark,
    /// 题目页（可能跨多题）
    Question(Vec<u32>),
    /// 未分配用途
    Unassigned,
}

/// 试卷结构
///
/// 打印前固定：公开码、份数、每份页数、(试卷, 页) → 版本 映射，以及各页用途。
/// 版本映射中未出现的试卷，所有页都是版本 1。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentStructure {
    pub name: String,
    pub public_code: String,
    pub number_of_papers: u32,
    pub pages_per_paper: u32,
    pub number_of_versions: u32,
    #[serde(default)]
    pub id_page: Option<u32>,
    #[serde(default)]
    pub do_not_mark_pages: Vec<u32>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
    #[serde(default)]
    pub version_map: Vec<PaperVersions>,
    #[serde(skip)]
    version_index: HashMap<u32, usize>,
}

impl AssessmentStructure {
    /// 创建所有页都是版本 1、没有题目的结构
    pub fn new(
        name: impl Into<String>,
        public_code: impl Into<String>,
        number_of_papers: u32,
        pages_per_paper: u32,
    ) -> Self {
        Self {
            name: name.into(),
            public_code: public_code.into(),
            number_of_papers,
            pages_per_paper,
            number_of_versions: 1,
            id_page: None,
            do_not_mark_pages: Vec::new(),
            questions: Vec::new(),
            version_map: Vec::new(),
            version_index: HashMap::new(),
        }
    }

    pub fn with_versions(mut self, number_of_versions: u32) -> Self {
        self.number_of_versions = number_of_versions;
        self
    }

    pub fn with_id_page(mut self, page: u32) -> Self {
        self.id_page = Some(page);
        self
    }

    pub fn with_question(mut self, index: u32, pages: Vec<u32>) -> Self {
        self.questions.push(QuestionSpec { index, pages });
        self
    }

    pub fn with_paper_versions(mut self, paper: u32, versions: Vec<u32>) -> Self {
        self.version_map.push(PaperVersions { paper, versions });
        self.rebuild_index();
        self
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let mut structure: AssessmentStructure = toml::from_str(content)?;
        structure.rebuild_index();
        structure.validate()?;
        Ok(structure)
    }

    /// 校验结构是否能被编码
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: String| -> Result<(), ConfigError> { Err(ConfigError::InvalidStructure(msg)) };

        if self.public_code.len() != PUBLIC_CODE_WIDTH
            || !self.public_code.bytes().all(|b| b.is_ascii_digit())
        {
            return invalid(format!(
                "公开码必须是 {} 位数字: '{}'",
                PUBLIC_CODE_WIDTH, self.public_code
            ));
        }
        let max_papers = 10u32.pow(PAPER_WIDTH as u32) - 1;
        if self.number_of_papers == 0 || self.number_of_papers > max_papers {
            return invalid(format!("试卷份数必须在 1..={} 之间", max_papers));
        }
        let max_pages = 10u32.pow(PAGE_WIDTH as u32) - 1;
        if self.pages_per_paper == 0 || self.pages_per_paper > max_pages {
            return invalid(format!("每份页数必须在 1..={} 之间", max_pages));
        }
        if !(1..=9).contains(&self.number_of_versions) {
            return invalid("版本数必须在 1..=9 之间".to_string());
        }
        if let Some(page) = self.id_page {
            if !self.page_in_range(page) {
                return invalid(format!("信息页 {} 超出范围", page));
            }
        }
        for page in &self.do_not_mark_pages {
            if !self.page_in_range(*page) {
                return invalid(format!("不阅页 {} 超出范围", page));
            }
        }
        for question in &self.questions {
            if question.pages.is_empty() {
                return invalid(format!("第 {} 题没有页面", question.index));
            }
            if let Some(page) = question.pages.iter().find(|p| !self.page_in_range(**p)) {
                return invalid(format!("第 {} 题的页 {} 超出范围", question.index, page));
            }
        }
        for entry in &self.version_map {
            if !self.paper_in_range(entry.paper) {
                return invalid(format!("版本映射中的试卷 {} 超出范围", entry.paper));
            }
            if entry.versions.len() != self.pages_per_paper as usize {
                return invalid(format!(
                    "试卷 {} 的版本数量 {} 与每份页数 {} 不一致",
                    entry.paper,
                    entry.versions.len(),
                    self.pages_per_paper
                ));
            }
            if entry
                .versions
                .iter()
                .any(|v| !(1..=self.number_of_versions).contains(v))
            {
                return invalid(format!("试卷 {} 含有超出范围的版本", entry.paper));
            }
        }
        Ok(())
    }

    pub fn paper_in_range(&self, paper: u32) -> bool {
        (1..=self.number_of_papers).contains(&paper)
    }

    pub fn page_in_range(&self, page: u32) -> bool {
        (1..=self.pages_per_paper).contains(&page)
    }

    /// 固定页的预期版本；位置不存在时返回 `None`
    pub fn expected_version(&self, position: PagePosition) -> Option<u32> {
        if !self.paper_in_range(position.paper) || !self.page_in_range(position.page) {
            return None;
        }
        let version = match self.version_index.get(&position.paper) {
            Some(&i) => self.version_map[i]
                .versions
                .get(position.page as usize - 1)
                .copied()
                .unwrap_or(1),
            None => 1,
        };
        Some(version)
    }

    /// 页面用途
    pub fn page_kind(&self, page: u32) -> PageKind {
        if self.id_page == Some(page) {
            return PageKind::Id;
        }
        if self.do_not_mark_pages.contains(&page) {
            return PageKind::DoNotMark;
        }
        let questions = self.questions_on_page(page);
        if questions.is_empty() {
            PageKind::Unassigned
        } else {
            PageKind::Question(questions)
        }
    }

    /// 某页上出现的题号（升序）
    pub fn questions_on_page(&self, page: u32) -> Vec<u32> {
        let mut questions: Vec<u32> = self
            .questions
            .iter()
            .filter(|q| q.pages.contains(&page))
            .map(|q| q.index)
            .collect();
        questions.sort_unstable();
        questions
    }

    pub fn has_question(&self, question: u32) -> bool {
        self.questions.iter().any(|q| q.index == question)
    }

    pub fn question_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.questions.iter().map(|q| q.index).collect();
        indices.sort_unstable();
        indices
    }

    fn rebuild_index(&mut self) {
        self.version_index = self
            .version_map
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.paper, i))
            .collect();
    }
}
