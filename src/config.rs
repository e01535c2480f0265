//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLSTUDY__*` 覆盖
//! （双下划线表示嵌套，如 `PLSTUDY__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub study: StudySection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// [study] 段：阶段门槛、全局批次顺序、口令表与输入文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StudySection {
    /// 简答题最少字符数
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    /// 进入生成前最少用户提问轮数
    #[serde(default = "default_min_user_turns")]
    pub min_user_turns: usize,
    /// 全局批次顺序（调度的唯一事实来源）
    #[serde(default = "default_batch_order")]
    pub batch_order: Vec<String>,
    /// full_type → 口令；无条目即无需口令，首个批次不得配置口令
    #[serde(default = "default_passcodes")]
    pub passcodes: HashMap<String, String>,
    #[serde(default = "default_roster_path")]
    pub roster_path: PathBuf,
    #[serde(default = "default_approved_ids_path")]
    pub approved_ids_path: PathBuf,
}

fn default_min_answer_chars() -> usize {
    75
}

fn default_min_user_turns() -> usize {
    3
}

fn default_batch_order() -> Vec<String> {
    vec![
        "static_1".to_string(),
        "interactive_3".to_string(),
        "finetuned_5".to_string(),
    ]
}

fn default_passcodes() -> HashMap<String, String> {
    HashMap::from([
        ("interactive_3".to_string(), "DOG721".to_string()),
        ("finetuned_5".to_string(), "CAT264".to_string()),
    ])
}

fn default_roster_path() -> PathBuf {
    PathBuf::from("data/roster.csv")
}

fn default_approved_ids_path() -> PathBuf {
    PathBuf::from("data/approved_ids.csv")
}

impl Default for StudySection {
    fn default() -> Self {
        Self {
            min_answer_chars: default_min_answer_chars(),
            min_user_turns: default_min_user_turns(),
            batch_order: default_batch_order(),
            passcodes: default_passcodes(),
            roster_path: default_roster_path(),
            approved_ids_path: default_approved_ids_path(),
        }
    }
}

/// [llm] 段：生成服务后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点（微调模型服务可在此指向自建地址）
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [storage] 段：进度文档根目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/participants")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            study: StudySection::default(),
            llm: LlmSection::default(),
            storage: StorageSection::default(),
        }
    }
}

impl StudySection {
    pub fn limits(&self) -> crate::pipeline::StageLimits {
        crate::pipeline::StageLimits {
            min_answer_chars: self.min_answer_chars,
            min_user_turns: self.min_user_turns,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PLSTUDY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLSTUDY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLSTUDY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_study_plan_shape() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.study.min_answer_chars, 75);
        assert_eq!(cfg.study.min_user_turns, 3);
        assert_eq!(cfg.study.batch_order[0], "static_1");
        assert_eq!(cfg.study.passcodes.get("interactive_3").unwrap(), "DOG721");
        assert!(!cfg.study.passcodes.contains_key("static_1"));
    }
}
