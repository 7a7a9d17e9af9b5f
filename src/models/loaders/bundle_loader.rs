use crate::models::bundle::{Bundle, RawPage};
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 可识别的扫描图像扩展名
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// 从目录加载一个批次，页序按文件名自然排序（page2 在 page10 之前）
pub async fn load_bundle_dir(dir: &Path) -> Result<Bundle> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("无法读取批次目录: {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_image(&path) {
            files.push(path);
        }
    }

    sort_naturally(&mut files)?;

    let mut pages = Vec::with_capacity(files.len());
    for path in files {
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("无法读取图像: {}", path.display()))?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        pages.push(RawPage::new(file_name, bytes));
    }

    let name = dir
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    Ok(Bundle::new(name, pages))
}

/// 加载文件夹下的所有批次（每个子目录一个批次）
pub async fn load_all_bundles(folder_path: &str) -> Result<Vec<Bundle>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    sort_naturally(&mut dirs)?;

    let mut bundles = Vec::new();
    for dir in dirs {
        tracing::info!(
            "正在加载批次: {}",
            dir.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_bundle_dir(&dir).await {
            Ok(bundle) if bundle.pages.is_empty() => {
                tracing::warn!("批次目录中没有图像，跳过: {}", dir.display());
            }
            Ok(bundle) => {
                tracing::info!("成功加载 {} 页", bundle.pages.len());
                bundles.push(bundle);
            }
            Err(e) => {
                tracing::warn!("加载批次失败 {}: {}", dir.display(), e);
            }
        }
    }

    Ok(bundles)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 按文件名中的数字段排序，其次按完整文件名
fn sort_naturally(paths: &mut [PathBuf]) -> Result<()> {
    let re = Regex::new(r"[0-9]+")?;
    paths.sort_by_cached_key(|path| {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let numbers: Vec<u64> = re
            .find_iter(&name)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        (numbers, name)
    });
    Ok(())
}
