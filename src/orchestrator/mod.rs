//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，也是唯一写认领表的流水线层。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量批次处理器
//! - 管理应用生命周期（初始化、运行、输出报告）
//! - 批量加载批次（Vec<Bundle>）
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `bundle_processor` - 单个批次处理器
//! - 每页读码分类（spawn_blocking），按顺序认领
//! - 冲突标记、批次报告
//! - 原子、幂等的推送
//! - 管理员清除
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Bundle>)
//!     ↓
//! bundle_processor (处理 Vec<RawPage>，认领)
//!     ↓
//! workflow::PageFlow (处理单页：读码 → 分类)
//!     ↓
//! services (能力层：code_reader / page_classifier / marking_feed / review_writer)
//!     ↓
//! infrastructure (基础设施：ClaimStore / ScanStore)
//! ```

pub mod batch_processor;
pub mod bundle_processor;

// 重新导出主要类型
pub use batch_processor::App;
pub use bundle_processor::{
    cancel_flag, process_bundle, BundleOutcome, BundleReconciler, CancelFlag, PaperProgress,
};
