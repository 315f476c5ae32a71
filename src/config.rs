/// 应用配置管理
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::refresh::DEFAULT_REFRESH_PERIOD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 状态自动刷新间隔（秒）
    pub refresh_interval_secs: u64,
    /// `upcoming` 命令默认查看的天数
    pub upcoming_days: i64,
    /// 是否安排提醒
    pub reminders: bool,
    /// 自定义数据文件路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_PERIOD.as_secs(),
            upcoming_days: 7,
            reminders: true,
            data_file: None,
        }
    }
}

impl Config {
    pub fn refresh_period(&self) -> Duration {
        // 0 会让 interval 直接 panic
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn data_path(&self) -> Result<PathBuf> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => crate::storage::default_data_path(),
        }
    }

    /// Set one key from its string form, as typed on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "refresh_interval_secs" | "refresh" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid number of seconds: {}", value))?;
                if secs == 0 {
                    anyhow::bail!("refresh_interval_secs must be at least 1");
                }
                self.refresh_interval_secs = secs;
            }
            "upcoming_days" | "days" => {
                let days: i64 = value
                    .parse()
                    .with_context(|| format!("Invalid number of days: {}", value))?;
                if days < 0 {
                    anyhow::bail!("upcoming_days must not be negative");
                }
                self.upcoming_days = days;
            }
            "reminders" => {
                self.reminders = match value {
                    "true" | "on" | "yes" => true,
                    "false" | "off" | "no" => false,
                    _ => anyhow::bail!("Invalid value for reminders: {} (expected on/off)", value),
                };
            }
            "data_file" => {
                self.data_file = match value {
                    "" | "default" => None,
                    path => Some(PathBuf::from(path)),
                };
            }
            _ => anyhow::bail!(
                "Unknown config key: {}\nAvailable keys: refresh_interval_secs, upcoming_days, reminders, data_file",
                key
            ),
        }
        Ok(())
    }
}

/// 获取配置文件路径
/// Windows: %APPDATA%\duetask\config.toml
/// macOS: ~/Library/Application Support/duetask/config.toml
/// Linux: ~/.config/duetask/config.toml
pub fn get_config_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().context("Failed to get user directories")?;
    Ok(dirs.config_dir().join("duetask").join("config.toml"))
}

/// 加载配置
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        // 配置文件不存在，返回默认配置
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    parse_config(&content).with_context(|| format!("Invalid config file {}", config_path.display()))
}

fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// 保存配置
pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;

    // 确保目录存在
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(config_path, content)?;

    Ok(())
}

/// 显示当前配置
pub fn show_config() -> Result<()> {
    let config = load_config()?;
    println!("Current configuration:");
    println!("  refresh_interval_secs: {}", config.refresh_interval_secs);
    println!("  upcoming_days:         {}", config.upcoming_days);
    println!("  reminders:             {}", if config.reminders { "on" } else { "off" });
    println!("  data_file:             {}", config.data_path()?.display());
    println!();
    println!("Config file: {}", get_config_path()?.display());
    Ok(())
}

/// 更新一个配置项并保存
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = load_config()?;
    config.set(key, value)?;
    save_config(&config)?;
    println!("✓ {} updated", key);
    Ok(())
}
