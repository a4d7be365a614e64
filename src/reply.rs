// reply.rs — Structured tutor replies: strict JSON decoding with sentinel
// fallbacks, and the fixed display template.
// Parsing always runs on the raw assistant text stored in the transcript.

use serde::Deserialize;
use serde_json::error::Category;
use tracing::warn;

/// One decoded tutor response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TutorReply {
    pub chinese: String,
    pub pinyin: String,
    pub english: String,
    pub corrections: String,
    pub explanation: String,
    pub tips: String,
}

/// Shape the model is asked to produce. Optional fields may be absent or null.
#[derive(Debug, Deserialize)]
struct WireReply {
    chinese: String,
    pinyin: String,
    english: String,
    #[serde(default)]
    corrections: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    tips: Option<String>,
}

impl From<WireReply> for TutorReply {
    fn from(w: WireReply) -> Self {
        TutorReply {
            chinese: w.chinese,
            pinyin: w.pinyin,
            english: w.english,
            corrections: w.corrections.unwrap_or_default(),
            explanation: w.explanation.unwrap_or_default(),
            tips: w.tips.unwrap_or_default(),
        }
    }
}

/// Why a payload could not become a `TutorReply`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON at all (or truncated JSON).
    #[error("malformed reply: {0}")]
    Malformed(String),
    /// Valid JSON, wrong shape (missing required field, wrong types, ...).
    #[error("{0}")]
    Shape(String),
}

const PARSE_ERROR: &str = "Error parsing response";
const RETRY_HINT: &str = "Please try again";

/// Strictly decode `raw` into a reply.
pub fn decode(raw: &str) -> Result<TutorReply, DecodeError> {
    match serde_json::from_str::<WireReply>(raw) {
        Ok(wire) => Ok(wire.into()),
        Err(e) => match e.classify() {
            Category::Data => Err(DecodeError::Shape(e.to_string())),
            Category::Syntax | Category::Eof | Category::Io => {
                Err(DecodeError::Malformed(e.to_string()))
            }
        },
    }
}

/// Decode `raw`, never failing: any decode error yields a sentinel reply so
/// there is always something to show.
pub fn parse(raw: &str) -> TutorReply {
    match decode(raw) {
        Ok(reply) => reply,
        Err(DecodeError::Malformed(detail)) => {
            warn!(%detail, "Reply is not valid JSON, showing raw text");
            TutorReply {
                chinese: raw.to_string(),
                pinyin: PARSE_ERROR.to_string(),
                english: PARSE_ERROR.to_string(),
                corrections: "Error in response format".to_string(),
                explanation: RETRY_HINT.to_string(),
                tips: String::new(),
            }
        }
        Err(DecodeError::Shape(detail)) => {
            warn!(%detail, "Reply JSON has an unexpected shape");
            TutorReply {
                chinese: "Error".to_string(),
                pinyin: "Error".to_string(),
                english: "Error".to_string(),
                corrections: detail,
                explanation: RETRY_HINT.to_string(),
                tips: String::new(),
            }
        }
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

/// Render a reply for display.
/// Chinese, pinyin and English always appear; the rest only when non-empty.
pub fn format(reply: &TutorReply) -> String {
    let mut lines = vec![
        format!("🈺 {}", or_placeholder(&reply.chinese, "No Chinese text")),
        format!("🔈 {}", or_placeholder(&reply.pinyin, "No pinyin")),
        format!("🌏 {}", or_placeholder(&reply.english, "No English translation")),
    ];

    if !reply.corrections.is_empty() {
        lines.push(format!("✍️ Corrections: {}", reply.corrections));
    }
    if !reply.explanation.is_empty() {
        lines.push(format!("📝 Note: {}", reply.explanation));
    }
    if !reply.tips.is_empty() {
        lines.push(format!("💡 Tip: {}", reply.tips));
    }

    lines.join("\n\n")
}
