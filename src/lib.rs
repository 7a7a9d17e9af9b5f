//! # Scan Reconcile
//!
//! 扫描答卷的页面识别与批次对账：把一堆可能重复、损坏或混入别的考试的扫描图像，
//! 变成"每个 (试卷, 页) 至多一张图像"的无冲突分配；拿不准的页面进入明确的待处理状态。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享状态，只暴露原子能力
//! - `ClaimStore` - 认领表，按 (试卷, 页) 比较并交换
//! - `ScanStore` - 扫描图像与批次记录
//!
//! ### ② 业务能力层（Services）
//! - `codec/` - 身份码编解码（纯函数）
//! - `CodeReader` - 四角读码 + 旋转推断
//! - `PageClassifier` - 读码结果 → 页面状态
//! - `MarkingFeed` / `ReviewWriter` - 输出
//!
//! ### ③ 流程层（Workflow）
//! - `PageCtx` - 上下文封装（批次 + 页序）
//! - `PageFlow` - 单页流程（读码 → 分类）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理，管理资源和并发
//! - `orchestrator/bundle_processor` - 单批次入库、认领、推送
//!
//! ### ⑤ 人工处理（Resolver）
//! - `ExceptionResolver` - 未知 / 冲突 / 丢弃页面的乐观并发裁决
//!
//! ## 模块结构

pub mod codec;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod resolver;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use codec::{Corner, DecodedCode, IdentityCode};
pub use config::Config;
pub use error::{AppError, AppResult, CodecError, ReconcileError, ResolveError};
pub use infrastructure::{ClaimOutcome, ClaimStore, MemoryClaimTable, ScanStore};
pub use models::{AssessmentStructure, Bundle, BundleReport, ImageId, PagePosition, PageStatus, RawPage};
pub use orchestrator::{App, BundleReconciler};
pub use resolver::{Destination, ExceptionResolver, LoserPolicy};
pub use services::{CodeReader, SymbolDecoder};
pub use workflow::{PageCtx, PageFlow};
