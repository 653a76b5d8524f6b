//! Parent report text: prompt construction and the Gemini `generateContent`
//! client behind the `TextGenerator` seam.

use crate::config::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const FALLBACK_REPORT: &str = "عذراً، حدثت مشكلة أثناء محاولة إنشاء التقرير الذكي.";
const EMPTY_REPORT: &str = "لم يتمكن الذكاء الاصطناعي من توليد نص حالياً.";

pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

pub fn parent_report_prompt(
    student_name: &str,
    attendance_rate: Option<f64>,
    performance: Option<f64>,
) -> String {
    let pct = |v: Option<f64>| {
        v.map(|p| format!("{}%", p.round() as i64))
            .unwrap_or_else(|| "غير متوفرة".to_string())
    };
    format!(
        "اكتب تقريراً قصيراً ومحفزاً لولي أمر الطالب {} بناءً على البيانات التالية باللغة العربية:\n\
         - نسبة الحضور: {}\n\
         - متوسط الدرجات: {}\n\
         اجعل التقرير مناسباً للإرسال عبر واتساب وبأسلوب مهذب وداعم.",
        student_name,
        pct(attendance_rate),
        pct(performance)
    )
}

pub fn whatsapp_url(phone: &str, text: &str) -> Option<String> {
    let digits = phone
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        return None;
    }
    let encoded = url::form_urlencoded::byte_serialize(text.as_bytes()).collect::<String>();
    Some(format!("https://wa.me/{}?text={}", digits, encoded))
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: String,
}

/// Reads the first candidate's text; a reply with no usable text becomes the
/// stock "nothing generated" message.
fn response_text(body: &str) -> anyhow::Result<String> {
    let parsed: GeminiResponse = serde_json::from_str(body)?;
    let text = parsed
        .candidates
        .into_iter()
        .next()
        .map(|c| {
            c.content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Ok(EMPTY_REPORT.to_string());
    }
    Ok(text)
}

pub struct GeminiClient {
    config: GeneratorConfig,
}

impl GeminiClient {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let api_key = self.config.api_key().ok_or_else(|| {
            anyhow::anyhow!("missing API key (set {})", self.config.api_key_env)
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;
        let url = format!(
            "{}/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model.trim()
        );
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };
        let resp = client
            .post(url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()?;
        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            anyhow::bail!("generateContent returned {}: {}", status, text);
        }
        response_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_name_and_rounded_rates() {
        let p = parent_report_prompt("أحمد محمد علي", Some(93.6), None);
        assert!(p.contains("أحمد محمد علي"));
        assert!(p.contains("نسبة الحضور: 94%"));
        assert!(p.contains("متوسط الدرجات: غير متوفرة"));
    }

    #[test]
    fn whatsapp_link_strips_phone_formatting() {
        let url = whatsapp_url("+966 50-123-4567", "hi there").expect("url");
        assert_eq!(url, "https://wa.me/966501234567?text=hi+there");
        assert_eq!(whatsapp_url("", "x"), None);
    }

    #[test]
    fn missing_key_is_an_error() {
        let cfg = GeneratorConfig {
            api_key_env: format!("SCHOOLD_TEST_NO_KEY_{}", uuid::Uuid::new_v4().simple()),
            ..GeneratorConfig::default()
        };
        assert!(GeminiClient::new(cfg).generate("x").is_err());
    }

    #[test]
    fn response_parts_are_joined() {
        let body = r#"{
            "candidates": [
                { "content": { "parts": [{ "text": "ولي الأمر الكريم، " }, { "text": "أحمد مجتهد." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }"#;
        assert_eq!(response_text(body).expect("parse"), "ولي الأمر الكريم، أحمد مجتهد.");
    }

    #[test]
    fn empty_response_uses_stock_message() {
        assert_eq!(response_text("{}").expect("parse"), EMPTY_REPORT);
        let blank = r#"{ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] }"#;
        assert_eq!(response_text(blank).expect("parse"), EMPTY_REPORT);
        let no_parts = r#"{ "candidates": [{ "content": {} }] }"#;
        assert_eq!(response_text(no_parts).expect("parse"), EMPTY_REPORT);
        assert!(response_text("<html>").is_err());
    }
}
