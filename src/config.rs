use crate::services::code_reader::DEFAULT_CORNER_FRACTION;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时处理的批次数量
    pub max_concurrent_bundles: usize,
    /// 试卷结构 TOML 文件
    pub assessment_file: String,
    /// 扫描批次目录（每个子目录是一个批次）
    pub bundle_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    /// 批次报告 + 阅卷清单（JSON）
    pub report_file: String,
    /// 待人工处理页面清单
    pub review_file: String,
    /// 角区域占宽/高的比例
    pub corner_fraction: f32,
    /// 完美批次是否自动推送
    pub auto_push: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_bundles: 4,
            assessment_file: "assessment.toml".to_string(),
            bundle_folder: "scans".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            report_file: "report.json".to_string(),
            review_file: "review.txt".to_string(),
            corner_fraction: DEFAULT_CORNER_FRACTION,
            auto_push: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_bundles: std::env::var("MAX_CONCURRENT_BUNDLES").ok().and_then(|v| v.parse().ok()).filter(|&n| n > 0).unwrap_or(default.max_concurrent_bundles),
            assessment_file: std::env::var("ASSESSMENT_FILE").unwrap_or(default.assessment_file),
            bundle_folder: std::env::var("BUNDLE_FOLDER").unwrap_or(default.bundle_folder),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            report_file: std::env::var("REPORT_FILE").unwrap_or(default.report_file),
            review_file: std::env::var("REVIEW_FILE").unwrap_or(default.review_file),
            corner_fraction: std::env::var("CORNER_FRACTION").ok().and_then(|v| v.parse().ok()).unwrap_or(default.corner_fraction),
            auto_push: std::env::var("AUTO_PUSH").ok().and_then(|v| v.parse().ok()).unwrap_or(default.auto_push),
        }
    }
}
