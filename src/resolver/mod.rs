//! 人工处理层（Operator）
//!
//! 对外提供异常页面的查询和裁决接口，所有裁决都在提交时重新校验。

pub mod exception_resolver;

pub use exception_resolver::{
    CollisionView, Destination, ExceptionResolver, LoserPolicy, PageView,
};
