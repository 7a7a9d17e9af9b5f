//! 待处理页面记录 - 业务能力层
//!
//! 只负责"把需要人工处理的页面写入 review.txt"能力，不关心流程

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::debug;

use crate::models::bundle::PageReport;

/// 待处理页面记录服务
///
/// 职责：
/// - 将未知/冲突/错误页写入 review.txt，供人工处理
/// - 每次只写一页
pub struct ReviewWriter {
    review_file_path: String,
}

impl ReviewWriter {
    pub fn new() -> Self {
        Self {
            review_file_path: "review.txt".to_string(),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            review_file_path: path.into(),
        }
    }

    /// 清空记录文件；每次运行开始时调用，避免残留上一次运行的图像
    pub fn reset(&self) -> Result<()> {
        fs::write(&self.review_file_path, "")
            .with_context(|| format!("无法清空待处理页面文件: {}", self.review_file_path))?;
        Ok(())
    }

    /// 写入一页
    ///
    /// # 参数
    /// - `bundle_name`: 批次名称
    /// - `page`: 页面报告
    pub fn write(&self, bundle_name: &str, page: &PageReport) -> Result<()> {
        debug!(
            "写入待处理页面: 批次 {} | 第 {} 页 | {}",
            bundle_name, page.order, page.status
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.review_file_path)?;

        let line = format!(
            "批次 {} | 第 {} 页 ({}) | 图像 {} | 状态: {} | {}\n",
            bundle_name,
            page.order,
            page.file_name,
            page.image,
            page.status,
            page.diagnostic.as_deref().unwrap_or("-")
        );

        file.write_all(line.as_bytes())?;

        Ok(())
    }
}

impl Default for ReviewWriter {
    fn default() -> Self {
        Self::new()
    }
}
