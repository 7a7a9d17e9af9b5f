//! 基础设施层（Infrastructure）
//!
//! 持有共享资源，只暴露原子能力：
//! - `ClaimStore` / `MemoryClaimTable` - 认领表
//! - `ScanStore` - 扫描图像与批次记录

pub mod claim_table;
pub mod scan_store;

pub use claim_table::{ClaimOutcome, ClaimSnapshot, ClaimStore, MemoryClaimTable};
pub use scan_store::{BundleRecord, ScanStore};
