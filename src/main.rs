use anyhow::Result;
use scan_reconcile::{utils, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    utils::init(config.verbose_logging);

    // 初始化并运行应用
    let stats = App::initialize(config).await?.run().await?;

    if stats.pending > 0 || stats.failed > 0 {
        tracing::warn!("⚠️ 仍有批次需要人工处理，请查看待处理清单");
    }

    Ok(())
}
