//! 单元（摘要）任务数据：术语熟悉度、对话记录、作答与对比评分
//!
//! 一个 Unit 对应一位参与者的一篇科研摘要及其全部任务状态；
//! `completed` 只在终态转移时置位一次，之后不再回退。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 对话角色（与生成服务 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// 对话记录中的单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 术语需要的补充信息类别；`None` 表示读者判断无需补充
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtraInfo {
    Definition,
    Example,
    Background,
    None,
}

/// 单个关键术语的熟悉度条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub term: String,
    /// 1..=5，未评为 None
    pub familiarity_score: Option<u8>,
    pub extra_information: BTreeSet<ExtraInfo>,
}

impl TermEntry {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            familiarity_score: None,
            extra_information: BTreeSet::new(),
        }
    }
}

/// 多选理解题（SATA）：题干、候选项与正确项下标集合
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SataQuestion {
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct: BTreeSet<usize>,
}

/// 三道简答题的最终作答与分题累计用时（秒）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShortAnswers {
    pub main_idea: String,
    pub methods: String,
    pub results: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_main_idea: f64,
    pub time_method: f64,
    pub time_result: f64,
}

/// SATA 作答：每题的选中下标集合与分题累计用时（秒）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SataAnswers {
    pub selections: Vec<BTreeSet<usize>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_per_question: Vec<f64>,
}

/// 对比评分量表名（基础五项 + 会话阶段附加两项）
pub const BASE_SCALES: [&str; 5] = [
    "simplicity",
    "coherence",
    "informativeness",
    "background_information",
    "faithfulness",
];

pub const CHATBOT_SCALES: [&str; 2] = ["chatbot_usefulness", "chatbot_answer_quality"];

/// 摘要 vs 重写文本的对比评分（1..=5，未答为 None）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRatings {
    pub simplicity: Option<u8>,
    pub coherence: Option<u8>,
    pub informativeness: Option<u8>,
    pub background_information: Option<u8>,
    pub faithfulness: Option<u8>,
    pub chatbot_usefulness: Option<u8>,
    pub chatbot_answer_quality: Option<u8>,
}

impl ComparisonRatings {
    /// 量表的唯一写入路径；未知量表名或超出 1..=5 返回 false
    pub fn set(&mut self, scale: &str, value: u8) -> bool {
        if !(1..=5).contains(&value) {
            return false;
        }
        let slot = match scale {
            "simplicity" => &mut self.simplicity,
            "coherence" => &mut self.coherence,
            "informativeness" => &mut self.informativeness,
            "background_information" => &mut self.background_information,
            "faithfulness" => &mut self.faithfulness,
            "chatbot_usefulness" => &mut self.chatbot_usefulness,
            "chatbot_answer_quality" => &mut self.chatbot_answer_quality,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn get(&self, scale: &str) -> Option<u8> {
        match scale {
            "simplicity" => self.simplicity,
            "coherence" => self.coherence,
            "informativeness" => self.informativeness,
            "background_information" => self.background_information,
            "faithfulness" => self.faithfulness,
            "chatbot_usefulness" => self.chatbot_usefulness,
            "chatbot_answer_quality" => self.chatbot_answer_quality,
            _ => None,
        }
    }

    /// 返回 required 中第一个尚未作答的量表名
    pub fn first_missing(&self, required: &[&'static str]) -> Option<&'static str> {
        required.iter().copied().find(|s| self.get(s).is_none())
    }
}

/// 对比评分的提交记录：时间戳、停留用时与各量表值
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LikertReport {
    pub timestamp: DateTime<Utc>,
    pub time_spent_seconds: f64,
    pub responses: ComparisonRatings,
}

/// 简答题默认题干（花名册未提供逐篇题干时使用）
pub const DEFAULT_MAIN_IDEA_QUESTION: &str =
    "What did the researchers in this study want to find out?";
pub const DEFAULT_METHOD_QUESTION: &str = "What was the method used in the study?";
pub const DEFAULT_RESULT_QUESTION: &str = "What was the result of this study?";

/// 一篇摘要在一位参与者名下的完整任务状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Unit {
    pub abstract_title: String,
    pub abstract_text: String,
    /// 人工撰写的参考重写文本（若有）
    #[serde(default)]
    pub human_reference: Option<String>,
    #[serde(default)]
    pub main_idea_question: Option<String>,
    #[serde(default)]
    pub method_question: Option<String>,
    #[serde(default)]
    pub result_question: Option<String>,
    /// 非空时该单元走 SATA 作答，否则走三道简答
    #[serde(default)]
    pub sata_questions: Vec<SataQuestion>,
    /// 仅词汇阶段（static）使用，保持花名册给出的顺序
    #[serde(default)]
    pub term_familiarity: Vec<TermEntry>,
    #[serde(default)]
    pub conversation_log: Vec<ConversationTurn>,
    #[serde(default)]
    pub generated_summary: Option<String>,
    #[serde(default)]
    pub short_answers: Option<ShortAnswers>,
    #[serde(default)]
    pub sata_answers: Option<SataAnswers>,
    #[serde(default)]
    pub likert: Option<LikertReport>,
    #[serde(default)]
    pub completed: bool,
    /// 术语两个子阶段的停留秒数
    #[serde(default)]
    pub time_familiarity: f64,
    #[serde(default)]
    pub time_extra_info: f64,
}

impl Unit {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            abstract_title: title.into(),
            abstract_text: text.into(),
            human_reference: None,
            main_idea_question: None,
            method_question: None,
            result_question: None,
            sata_questions: Vec::new(),
            term_familiarity: Vec::new(),
            conversation_log: Vec::new(),
            generated_summary: None,
            short_answers: None,
            sata_answers: None,
            likert: None,
            completed: false,
            time_familiarity: 0.0,
            time_extra_info: 0.0,
        }
    }

    pub fn uses_sata(&self) -> bool {
        !self.sata_questions.is_empty()
    }

    /// 对话中参与者发出的轮次（生成请求只读这部分）
    pub fn user_turns(&self) -> Vec<&ConversationTurn> {
        self.conversation_log
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .collect()
    }

    /// 三道简答题干（逐篇覆盖优先于默认）
    pub fn question_prompts(&self) -> [String; 3] {
        [
            self.main_idea_question
                .clone()
                .unwrap_or_else(|| DEFAULT_MAIN_IDEA_QUESTION.to_string()),
            self.method_question
                .clone()
                .unwrap_or_else(|| DEFAULT_METHOD_QUESTION.to_string()),
            self.result_question
                .clone()
                .unwrap_or_else(|| DEFAULT_RESULT_QUESTION.to_string()),
        ]
    }
}
