//! 批量批次处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量扫描批次的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、加载试卷结构、创建认领表与存储
//! 2. **批量加载**：扫描目录下的所有批次（`Vec<Bundle>`）
//! 3. **并发控制**：使用 Semaphore 限制同时处理的批次数
//! 4. **分组处理**：每组完成后再开始下一组
//! 5. **输出**：批次报告 + 阅卷清单写入 JSON
//! 6. **全局统计**：汇总所有批次的处理结果
//!
//! 不处理单个批次的细节，委托给 `bundle_processor`。

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::bundle::{Bundle, BundleReport};
use crate::orchestrator::bundle_processor::{self, BundleOutcome, BundleReconciler};
use crate::resolver::ExceptionResolver;
use crate::services::{CodeReader, MarkingFeed, ReviewWriter};
use crate::utils::logging::{self, RunStats};

/// 输出文件内容
#[derive(Debug, Serialize)]
struct RunReport {
    generated_at: String,
    assessment: String,
    bundles: Vec<BundleReport>,
    marking_feed: MarkingFeed,
}

/// 应用主结构
pub struct App {
    config: Config,
    reconciler: BundleReconciler,
    review_writer: Arc<ReviewWriter>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;

        let structure = crate::models::load_assessment(Path::new(&config.assessment_file))
            .await
            .with_context(|| format!("无法加载试卷结构: {}", config.assessment_file))?;

        logging::log_startup(
            &structure.name,
            config.max_concurrent_bundles,
            config.auto_push,
        );

        let reader = CodeReader::qr(config.corner_fraction);
        let reconciler = BundleReconciler::in_memory(structure, reader, config.verbose_logging);
        let review_writer = Arc::new(ReviewWriter::with_path(config.review_file.clone()));
        review_writer.reset()?;

        Ok(Self {
            config,
            reconciler,
            review_writer,
        })
    }

    pub fn reconciler(&self) -> &BundleReconciler {
        &self.reconciler
    }

    /// 与本应用共享状态的人工处理接口
    pub fn resolver(&self) -> ExceptionResolver {
        ExceptionResolver::for_reconciler(&self.reconciler)
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        let all_bundles = self.load_bundles().await?;

        if all_bundles.is_empty() {
            warn!("⚠️ 没有找到待处理的扫描批次，程序结束");
            return Ok(RunStats::default());
        }

        logging::log_bundles_loaded(all_bundles.len(), self.config.max_concurrent_bundles);

        let stats = self.process_all_bundles(all_bundles).await?;

        self.write_report().await?;
        logging::print_final_stats(
            &stats,
            &self.config.output_log_file,
            &self.config.report_file,
        );

        Ok(stats)
    }

    async fn load_bundles(&self) -> Result<Vec<Bundle>> {
        info!("\n📁 正在扫描待处理的批次...");
        crate::models::load_all_bundles(&self.config.bundle_folder).await
    }

    /// 处理所有批次
    async fn process_all_bundles(&self, all_bundles: Vec<Bundle>) -> Result<RunStats> {
        let group_size = self.config.max_concurrent_bundles.max(1);
        let semaphore = Arc::new(Semaphore::new(group_size));
        let total = all_bundles.len();
        let total_groups = total.div_ceil(group_size);
        let mut stats = RunStats {
            total,
            ..Default::default()
        };

        let mut remaining = all_bundles.into_iter();
        for group_num in 1..=total_groups {
            let group: Vec<Bundle> = remaining.by_ref().take(group_size).collect();
            let start = (group_num - 1) * group_size + 1;
            let end = start + group.len() - 1;

            logging::log_group_start(group_num, total_groups, start, end, total);

            let group_stats = self.process_group(group, start, semaphore.clone()).await?;

            stats.perfect += group_stats.perfect;
            stats.pending += group_stats.pending;
            stats.failed += group_stats.failed;
            stats.pushed_pages += group_stats.pushed_pages;

            logging::log_group_complete(
                group_num,
                group_stats.perfect,
                group_stats.perfect + group_stats.pending + group_stats.failed,
            );
        }

        Ok(stats)
    }

    /// 处理一组批次
    async fn process_group(
        &self,
        group: Vec<Bundle>,
        first_index: usize,
        semaphore: Arc<Semaphore>,
    ) -> Result<RunStats> {
        let mut handles = Vec::new();

        for (offset, bundle) in group.into_iter().enumerate() {
            let bundle_index = first_index + offset;
            let permit = semaphore.clone().acquire_owned().await?;
            let reconciler = self.reconciler.clone();
            let review_writer = self.review_writer.clone();
            let auto_push = self.config.auto_push;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                bundle_processor::process_bundle(
                    &reconciler,
                    bundle,
                    bundle_index,
                    auto_push,
                    &review_writer,
                )
                .await
            });
            handles.push((bundle_index, handle));
        }

        let mut result = RunStats::default();
        for (bundle_index, handle) in handles {
            match handle.await {
                Ok(Ok(BundleOutcome { report, push })) => {
                    if report.perfect {
                        result.perfect += 1;
                    } else {
                        result.pending += 1;
                    }
                    if let Some(summary) = push {
                        result.pushed_pages += summary.newly_committed;
                    }
                }
                Ok(Err(e)) => {
                    error!("[批次 #{}] ❌ 处理过程中发生错误: {}", bundle_index, e);
                    result.failed += 1;
                }
                Err(e) => {
                    error!("[批次 #{}] 任务执行失败: {}", bundle_index, e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }

    /// 写入批次报告和阅卷清单
    async fn write_report(&self) -> Result<()> {
        let report = RunReport {
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            assessment: self.reconciler.structure().name.clone(),
            bundles: self.reconciler.reports().await,
            marking_feed: self.reconciler.marking_feed().await,
        };

        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&self.config.report_file, json)
            .await
            .with_context(|| format!("无法写入报告: {}", self.config.report_file))?;
        Ok(())
    }
}
