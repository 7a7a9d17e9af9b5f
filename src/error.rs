//! 错误类型
//!
//! 单页上的问题（码损坏、错卷、版本不符……）不是错误，而是页面状态，
//! 见 `models::scan::PageStatus`。这里只定义调用方需要处理的失败。

use thiserror::Error;

use crate::models::scan::{ImageId, PagePosition};

/// 应用程序错误类型
///
/// 编排层和二进制入口用 `anyhow`；这里只包装加载阶段的配置问题。
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 身份码编解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// 长度或字符集不合法
    #[error("身份码格式错误 '{code}': {reason}")]
    MalformedCode { code: String, reason: &'static str },
    /// 字段超出定宽
    #[error("字段 {field} 的值 {value} 超出编码宽度")]
    FieldOverflow { field: &'static str, value: String },
}

/// 批次对账错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// 同一批次（内容哈希相同）已经入库
    #[error("批次 {bundle} 已经入库")]
    AlreadyStaged { bundle: String },
    /// 批次不存在
    #[error("批次 {bundle} 不存在")]
    UnknownBundle { bundle: String },
    /// 批次仍有待处理页面，不能推送
    #[error("批次 {bundle} 未就绪: 未知 {unknown}, 冲突 {collision}, 错误 {error}")]
    NotPerfect {
        bundle: String,
        unknown: usize,
        collision: usize,
        error: usize,
    },
    /// 推送时发现位置已被其他图像占用，整批回滚
    #[error("位置 {slot} 已被图像 {holder} 占用，推送已回滚")]
    ClaimLost { slot: PagePosition, holder: ImageId },
    /// 处理被取消
    #[error("批次 {bundle} 处理已取消")]
    Cancelled { bundle: String },
}

/// 人工处理（异常页面裁决）错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// 视图已过期，需要重新获取后重试
    #[error("数据已变化，请刷新后重试 (图像 {image})")]
    Stale { image: ImageId },
    /// 目标位置不合法
    #[error("目标不合法: {reason}")]
    InvalidDestination { reason: String },
    /// 目标位置已被占用
    #[error("位置 {slot} 已被图像 {holder} 占用")]
    AlreadyClaimed { slot: PagePosition, holder: ImageId },
    /// 图像不存在
    #[error("图像 {image} 不存在")]
    NotFound { image: ImageId },
    /// 当前状态不允许该操作
    #[error("图像 {image} 当前状态 {status} 不允许此操作")]
    InvalidTransition { image: ImageId, status: String },
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 试卷结构不合法
    #[error("试卷结构不合法: {0}")]
    InvalidStructure(String),
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::InvalidStructure(err.to_string()))
    }
}

// ========== 便捷构造函数 ==========

impl ResolveError {
    /// 创建目标不合法错误
    pub fn invalid_destination(reason: impl Into<String>) -> Self {
        ResolveError::InvalidDestination {
            reason: reason.into(),
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
