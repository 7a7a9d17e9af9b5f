use anyhow::{Context, Result};
/// 日志工具模块
///
/// 提供日志初始化、日志文件和运行横幅的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 安装 tracing 订阅者
///
/// 优先使用 `RUST_LOG`；未设置时为 `info`，详细模式下为 `debug`。
/// 重复调用（例如多个测试）不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n扫描对账日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(assessment: &str, max_concurrent: usize, auto_push: bool) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 扫描批次对账模式");
    info!("📝 试卷: {}", assessment);
    info!("📊 最大并发批次数: {}", max_concurrent);
    info!("📤 自动推送: {}", if auto_push { "开启" } else { "关闭" });
    info!("{}", "=".repeat(60));
}

/// 记录批次加载信息
pub fn log_bundles_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待处理的批次", total);
    info!("📋 将以每组 {} 个的方式处理", max_concurrent);
    info!("💡 每组完成后再开始下一组\n");
}

/// 记录分组开始信息
///
/// # 参数
/// - `group_num`: 分组编号
/// - `total_groups`: 分组总数
/// - `start`: 起始批次编号
/// - `end`: 结束批次编号
/// - `total`: 批次总数
pub fn log_group_start(group_num: usize, total_groups: usize, start: usize, end: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 组", group_num, total_groups);
    info!("📄 本组批次: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

pub fn log_group_complete(group_num: usize, perfect: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 组完成: 完美批次 {}/{}", group_num, perfect, total);
    info!("{}", "─".repeat(60));
}

/// 运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub perfect: usize,
    pub pending: usize,
    pub failed: usize,
    pub pushed_pages: usize,
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &RunStats, log_file_path: &str, report_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完美批次: {}/{}", stats.perfect, stats.total);
    info!("⚠️ 待人工处理: {}", stats.pending);
    info!("❌ 失败: {}", stats.failed);
    info!("📤 本次提交页数: {}", stats.pushed_pages);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
    info!("报告已保存至: {}", report_file_path);
}
