//! 页面处理上下文
//!
//! 封装"我正在处理哪个批次的第几页"这一信息

use std::fmt::Display;

use crate::models::scan::ContentHash;

/// 页面处理上下文
#[derive(Debug, Clone)]
pub struct PageCtx {
    /// 批次哈希
    pub bundle: ContentHash,

    /// 批次名称（仅用于日志显示）
    pub bundle_name: String,

    /// 页面在批次中的顺序（从1开始）
    pub order: usize,

    /// 批次总页数
    pub total: usize,
}

impl PageCtx {
    pub fn new(bundle: ContentHash, bundle_name: String, order: usize, total: usize) -> Self {
        Self {
            bundle,
            bundle_name,
            order,
            total,
        }
    }
}

impl Display for PageCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[批次 {} 第 {}/{} 页]",
            self.bundle_name, self.order, self.total
        )
    }
}
