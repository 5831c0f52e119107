//! Attribute types - key/value facts attached to an entity

use serde::{Deserialize, Serialize};

/// The coerced type of an attribute value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Text,
    Number,
    Date,
    Boolean,
    List,
    Object,
    Url,
    Email,
    Phone,
}

impl Default for AttributeType {
    fn default() -> Self {
        Self::Text
    }
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Object => "object",
            Self::Url => "url",
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single attribute extracted for an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name (e.g. "founded", "revenue")
    pub name: String,

    /// Raw value as extracted
    pub value: String,

    /// Type-coerced value
    #[serde(default)]
    pub normalized_value: String,

    /// Coerced value type
    #[serde(default)]
    pub attr_type: AttributeType,

    /// Confidence score (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f32,

    /// Text the value was extracted from
    #[serde(default)]
    pub source_text: String,
}

impl Attribute {
    /// Create an attribute, coercing the raw value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let (normalized_value, attr_type) = normalize_value(&value);
        Self {
            name: name.into().to_lowercase(),
            value,
            normalized_value,
            attr_type,
            confidence: 0.5,
            source_text: String::new(),
        }
    }

    /// Builder: set confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Builder: set source text
    pub fn with_source(mut self, source_text: impl Into<String>) -> Self {
        self.source_text = source_text.into();
        self
    }
}

/// Coerce a raw string value into a normalized form and type.
///
/// Coercions, in precedence order: booleans, bare 4-digit years (to ISO
/// dates), numbers with thousands separators, URLs, emails, phone numbers
/// (to a dashed form). Everything else stays text.
pub fn normalize_value(raw: &str) -> (String, AttributeType) {
    let trimmed = raw.trim();

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" => return ("true".to_string(), AttributeType::Boolean),
        "false" | "no" => return ("false".to_string(), AttributeType::Boolean),
        _ => {}
    }

    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return (format!("{}-01-01", trimmed), AttributeType::Date);
    }

    let without_separators: String = trimmed.chars().filter(|c| *c != ',').collect();
    if !without_separators.is_empty() && without_separators.parse::<f64>().is_ok() {
        return (without_separators, AttributeType::Number);
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return (trimmed.to_string(), AttributeType::Url);
    }

    if trimmed.contains('@') && trimmed.contains('.') && !trimmed.contains(' ') {
        return (trimmed.to_lowercase(), AttributeType::Email);
    }

    if let Some(phone) = normalize_phone(trimmed) {
        return (phone, AttributeType::Phone);
    }

    (trimmed.to_string(), AttributeType::Text)
}

/// Canonical dashed phone form: 10 digits -> XXX-XXX-XXXX,
/// 11 digits -> X-XXX-XXX-XXXX. Anything else is not a phone number.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let non_digit_ok = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '+' | '.'));
    if !non_digit_ok {
        return None;
    }
    match digits.len() {
        10 => Some(format!(
            "{}-{}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..10]
        )),
        11 => Some(format!(
            "{}-{}-{}-{}",
            &digits[0..1],
            &digits[1..4],
            &digits[4..7],
            &digits[7..11]
        )),
        _ => None,
    }
}
