use crate::models::assessment::AssessmentStructure;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载试卷结构并校验
pub async fn load_assessment(toml_file_path: &Path) -> Result<AssessmentStructure> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let structure = AssessmentStructure::from_toml_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    tracing::info!(
        "成功加载试卷结构: {} ({} 份 × {} 页, 公开码 {})",
        structure.name,
        structure.number_of_papers,
        structure.pages_per_paper,
        structure.public_code
    );

    Ok(structure)
}
