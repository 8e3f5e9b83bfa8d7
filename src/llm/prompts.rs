//! Mode-specific instructions sent alongside the captured image.
//!
//! The multiple-choice template ends in an `ĐÁP ÁN:` block of `Câu N: X`
//! lines and the essay template asks for a `FINAL_ANSWER:` line. Those exact
//! shapes are what [`crate::parser`] looks for.

use serde::{Deserialize, Serialize};

use crate::types::AnswerMode;

const GENERIC_PERSONA: &str = "Bạn là trợ lý AI thông minh.";

const MULTIPLE_CHOICE_BODY: &str = "NHIỆM VỤ: Trả lời các câu hỏi trắc nghiệm trong hình.

CÁCH LÀM:
1. Đọc và hiểu từng câu hỏi
2. Suy luận ngắn gọn (1-2 dòng mỗi câu)
3. Đưa ra đáp án cuối cùng theo format bên dưới

FORMAT TRẢ LỜI (BẮT BUỘC):
[Suy luận ngắn cho mỗi câu]

ĐÁP ÁN:
Câu 1: [A/B/C/D]
Câu 2: [A/B/C/D]
(tiếp tục nếu có nhiều câu)

VÍ DỤ:
Câu 1 hỏi về thì quá khứ hoàn thành, dấu hiệu \"before\" -> dùng had + V3.
Câu 2 hỏi về từ vựng, \"essential\" = cần thiết.

ĐÁP ÁN:
Câu 1: A
Câu 2: C

Bắt đầu phân tích và trả lời:";

const ESSAY_BODY: &str = "Phân tích hình ảnh này và trả lời chi tiết câu hỏi.

Quy tắc:
1. Đọc và hiểu câu hỏi trong hình
2. Phân tích kỹ lưỡng
3. Giải thích từng bước
4. Đưa ra câu trả lời cuối cùng

Format trả lời:
1. Tóm tắt câu hỏi
2. Phân tích chi tiết
3. Các bước giải quyết
4. FINAL_ANSWER: [câu trả lời cuối cùng]

Hãy trả lời bằng tiếng Việt, rõ ràng và chi tiết.";

/// Persona sentence opening every prompt.
pub fn build_persona(expert_context: &str) -> String {
    let context = expert_context.trim();
    if context.is_empty() {
        GENERIC_PERSONA.to_string()
    } else {
        format!("Bạn là chuyên gia {context}.")
    }
}

/// Full instruction block for `mode`.
pub fn build_prompt(mode: AnswerMode, expert_context: &str) -> String {
    let body = match mode {
        AnswerMode::MultipleChoice => MULTIPLE_CHOICE_BODY,
        AnswerMode::Essay => ESSAY_BODY,
    };
    format!("{}\n\n{}", build_persona(expert_context), body)
}

/// Sampling settings forwarded to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl GenerationConfig {
    /// Near-deterministic for letter answers, looser and longer for essays.
    pub fn for_mode(mode: AnswerMode) -> Self {
        match mode {
            AnswerMode::MultipleChoice => Self {
                temperature: 0.1,
                top_k: 1,
                top_p: 0.8,
                max_output_tokens: 512,
            },
            AnswerMode::Essay => Self {
                temperature: 0.4,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 2048,
            },
        }
    }
}
