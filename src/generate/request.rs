//! 生成请求构造：实时问答与受约束的平实语言重写
//!
//! 重写请求只读对话中的用户轮次；带 SATA 题的单元把题目作为软约束
//! 嵌入请求：正确项可从重写文本推断，但不得点名、罗列或排序选项。

use crate::generate::ChatMessage;
use crate::model::{TurnRole, Unit};

pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant explaining scientific abstracts.";

const REWRITE_PREAMBLE: &str = "You are an expert science communicator working with a reader \
who asked questions about a scientific abstract.";

const REWRITE_TASK: &str = "Use these questions to identify what concepts, terms, or results \
the reader found confusing, interesting, or important. Then rewrite the original abstract into \
a clear, accurate, plain-language summary that preserves all key scientific details but \
provides additional explanation and context for the specific parts the reader asked about or \
struggled to understand. The goal is to make the abstract easier to understand while staying \
true to the science.";

const SATA_CONSTRAINT: &str = "The reader will afterwards answer the following \
select-all-that-apply questions. Write the summary so that every option marked correct can be \
inferred from the summary alone. Do not quote, list, or rank the options anywhere in the \
summary, and do not word the summary so that an incorrect option appears equally supported.";

/// 实时问答请求：系统提示 + 摘要全文 + 既有对话 + 本轮用户输入
pub fn chat_request(unit: &Unit, pending_user_text: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(format!(
        "{CHAT_SYSTEM_PROMPT}\n\nTitle: {}\n\nAbstract:\n{}",
        unit.abstract_title, unit.abstract_text
    ))];
    for turn in &unit.conversation_log {
        messages.push(match turn.role {
            TurnRole::User => ChatMessage::user(turn.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }
    messages.push(ChatMessage::user(pending_user_text));
    messages
}

/// 重写请求：用户轮次清单 + 重写指令 + 可选 SATA 软约束
pub fn summary_request(unit: &Unit) -> Vec<ChatMessage> {
    let mut prompt = String::new();
    prompt.push_str(REWRITE_PREAMBLE);
    prompt.push_str("\n\nThe reader asked the following questions:\n");
    for turn in unit.user_turns() {
        prompt.push_str("- ");
        prompt.push_str(&turn.content);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(REWRITE_TASK);

    if unit.uses_sata() {
        prompt.push_str("\n\n");
        prompt.push_str(SATA_CONSTRAINT);
        for q in &unit.sata_questions {
            prompt.push_str(&format!("\n\nQuestion: {}", q.prompt));
            prompt.push_str(&format!("\nOptions: {}", q.choices.join("; ")));
            let correct: Vec<&str> = q
                .correct
                .iter()
                .filter_map(|i| q.choices.get(*i).map(String::as_str))
                .collect();
            prompt.push_str(&format!("\nCorrect: {}", correct.join("; ")));
        }
    }

    vec![
        ChatMessage::system(prompt),
        ChatMessage::user(format!("Rewrite this abstract:\n\n{}", unit.abstract_text)),
    ]
}
