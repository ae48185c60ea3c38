//! 调度器配置文件.
//!
//! 配置以 JSON 保存, 缺省字段取 [`SchedulerConfig`] 的默认值.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use tao_vvc::SchedulerConfig;

/// 从 JSON 文件加载并校验调度器配置
pub fn load_config(path: impl AsRef<Path>) -> Result<SchedulerConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let config: SchedulerConfig = serde_json::from_str(&text)
        .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("配置文件无效: {}", path.display()))?;
    debug!("已加载调度器配置 {}: {:?}", path.display(), config);
    Ok(config)
}

/// 把配置写成带缩进的 JSON
pub fn save_config(config: &SchedulerConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(config).context("序列化配置失败")?;
    fs::write(path, text).with_context(|| format!("写入配置文件失败: {}", path.display()))?;
    Ok(())
}
