//! Request and result types for the filter pipeline
//!
//! These are the wire types of `POST /v1/filter` and friends, plus the
//! closed flag vocabulary shared by the pre-screener, the AI providers and
//! the statistics tracker.

use serde::{Deserialize, Deserializer, Serialize};

use crate::ai::ModelTier;

/// Maximum accepted text payload (10 MB).
pub const MAX_TEXT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum accepted prior-message history length.
pub const MAX_HISTORY_MESSAGES: usize = 15;

// ============================================================================
// Flags
// ============================================================================

/// Closed vocabulary of content-category labels.
///
/// Wire representation is the lowercase snake_case string. Pre-screen
/// variants (`*_intent`, `critical_term`, `obfuscation`) mark deterministic
/// matches; `error` marks an AI provider failure and is the only flag that
/// may appear on an allowed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Abuse,
    Phone,
    Email,
    Address,
    CreditCard,
    Cvv,
    SocialMedia,
    Pii,
    Inappropriate,
    Error,
    CriticalTerm,
    Obfuscation,
    PhoneNumber,
    PhoneNumberIntent,
    EmailAddress,
    EmailAddressIntent,
    AbusiveLanguage,
    AbusiveLanguageIntent,
    PhysicalAddress,
    PhysicalInfoIntent,
    SocialMediaHandle,
    SocialMediaLink,
    SocialMediaIntent,
}

impl Flag {
    /// Wire string for this flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abuse => "abuse",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Address => "address",
            Self::CreditCard => "credit_card",
            Self::Cvv => "cvv",
            Self::SocialMedia => "social_media",
            Self::Pii => "pii",
            Self::Inappropriate => "inappropriate",
            Self::Error => "error",
            Self::CriticalTerm => "critical_term",
            Self::Obfuscation => "obfuscation",
            Self::PhoneNumber => "phone_number",
            Self::PhoneNumberIntent => "phone_number_intent",
            Self::EmailAddress => "email_address",
            Self::EmailAddressIntent => "email_address_intent",
            Self::AbusiveLanguage => "abusive_language",
            Self::AbusiveLanguageIntent => "abusive_language_intent",
            Self::PhysicalAddress => "physical_address",
            Self::PhysicalInfoIntent => "physical_info_intent",
            Self::SocialMediaHandle => "social_media_handle",
            Self::SocialMediaLink => "social_media_link",
            Self::SocialMediaIntent => "social_media_intent",
        }
    }

    /// Parse a flag from a wire string, accepting the camelCase aliases
    /// some model responses produce.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase();
        let flag = match normalized.as_str() {
            "abuse" => Self::Abuse,
            "phone" => Self::Phone,
            "email" => Self::Email,
            "address" => Self::Address,
            "credit_card" | "creditcard" => Self::CreditCard,
            "cvv" => Self::Cvv,
            "social_media" | "socialmedia" => Self::SocialMedia,
            "pii" => Self::Pii,
            "inappropriate" => Self::Inappropriate,
            "error" => Self::Error,
            "critical_term" => Self::CriticalTerm,
            "obfuscation" => Self::Obfuscation,
            "phone_number" | "phonenumber" => Self::PhoneNumber,
            "phone_number_intent" => Self::PhoneNumberIntent,
            "email_address" | "emailaddress" => Self::EmailAddress,
            "email_address_intent" => Self::EmailAddressIntent,
            "abusive_language" => Self::AbusiveLanguage,
            "abusive_language_intent" => Self::AbusiveLanguageIntent,
            "physical_address" => Self::PhysicalAddress,
            "physical_info_intent" => Self::PhysicalInfoIntent,
            "social_media_handle" => Self::SocialMediaHandle,
            "social_media_link" => Self::SocialMediaLink,
            "social_media_intent" => Self::SocialMediaIntent,
            _ => return None,
        };
        Some(flag)
    }

    /// Whether this flag marks a content violation (everything except
    /// `error`).
    pub fn is_violation(&self) -> bool {
        !matches!(self, Self::Error)
    }

    /// All wire strings, used by the keyword fallback when an AI response
    /// cannot be parsed as JSON.
    pub fn vocabulary() -> &'static [Flag] {
        &[
            Self::Abuse,
            Self::Phone,
            Self::Email,
            Self::Address,
            Self::CreditCard,
            Self::Cvv,
            Self::SocialMedia,
            Self::Pii,
            Self::Inappropriate,
            Self::CriticalTerm,
            Self::Obfuscation,
            Self::PhoneNumber,
            Self::PhoneNumberIntent,
            Self::EmailAddress,
            Self::EmailAddressIntent,
            Self::AbusiveLanguage,
            Self::AbusiveLanguageIntent,
            Self::PhysicalAddress,
            Self::PhysicalInfoIntent,
            Self::SocialMediaHandle,
            Self::SocialMediaLink,
            Self::SocialMediaIntent,
        ]
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Filter configuration
// ============================================================================

/// Caller-supplied per-request filter configuration.
///
/// Every field defaults to `false`, the most restrictive setting. Values
/// that are not the JSON literal `true` coerce to `false`, so two
/// semantically identical configs always produce the same cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Permit abusive language
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_abuse: bool,

    /// Permit phone numbers
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_phone: bool,

    /// Permit email addresses
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_email: bool,

    /// Permit street addresses and payment card data
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_physical_information: bool,

    /// Permit social media handles and links
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_social_information: bool,

    /// Return a redacted copy of the input when a violation is found
    #[serde(deserialize_with = "lenient_bool")]
    pub return_filtered_message: bool,
}

/// Accept any JSON value, coercing everything but `true` to `false`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(matches!(value, serde_json::Value::Bool(true)))
}

impl FilterConfig {
    /// Pure normalization: fields are already coerced booleans, so this is
    /// idempotent by construction.
    pub fn normalize(self) -> Self {
        self
    }

    /// Deterministic key fragment with field names in sorted order, used by
    /// both the response cache and the AI-result cache.
    pub fn canonical_string(&self) -> String {
        format!(
            "allowAbuse={},allowEmail={},allowPhone={},allowPhysicalInformation={},allowSocialInformation={},returnFilteredMessage={}",
            self.allow_abuse,
            self.allow_email,
            self.allow_phone,
            self.allow_physical_information,
            self.allow_social_information,
            self.return_filtered_message
        )
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A prior conversation message, accepted either as a bare string or as an
/// object with a `text` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryMessage {
    /// Bare string form
    Text(String),
    /// Object form
    Object {
        /// Message text
        text: String,
    },
}

impl HistoryMessage {
    /// The message text regardless of wire form.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Object { text } => text,
        }
    }
}

/// Wire body of the filter endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterRequestBody {
    /// Text to moderate
    pub text: Option<String>,

    /// Base64 image to moderate
    pub image: Option<String>,

    /// Filter configuration; absent fields are false
    pub config: FilterConfig,

    /// Prior conversation context, oldest first
    pub old_messages: Option<Vec<HistoryMessage>>,

    /// Model tier name (`fast`, `normal`, `pro`)
    pub model: Option<String>,
}

/// A validated moderation request.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    /// Text to moderate
    pub text: Option<String>,

    /// Base64 image to moderate
    pub image: Option<String>,

    /// Normalized configuration
    pub config: FilterConfig,

    /// Prior conversation context, oldest first
    pub history: Vec<String>,

    /// Provider tier for the AI stage
    pub tier: ModelTier,
}

/// Validation failures surfaced as 400s.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither text nor image present
    #[error("request must contain text or image")]
    MissingContent,

    /// Text above the 10 MB ceiling
    #[error("text exceeds maximum length")]
    TextTooLarge,

    /// More than the allowed number of prior messages
    #[error("history exceeds 15 messages")]
    HistoryTooLong,

    /// Unknown model tier name
    #[error("unknown model tier: {0}")]
    UnknownTier(String),

    /// Image payload is not decodable base64
    #[error("image is not valid base64")]
    InvalidImage,
}

impl FilterRequestBody {
    /// Check the body against the request limits without consuming it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_text = self.text.as_deref().is_some_and(|t| !t.is_empty());
        let has_image = self.image.as_deref().is_some_and(|i| !i.is_empty());

        if !has_text && !has_image {
            return Err(ValidationError::MissingContent);
        }

        if let Some(text) = &self.text {
            if text.len() > MAX_TEXT_BYTES {
                return Err(ValidationError::TextTooLarge);
            }
        }

        if let Some(image) = self.image.as_deref().filter(|i| !i.is_empty()) {
            use base64::Engine as _;
            if base64::engine::general_purpose::STANDARD
                .decode(image.as_bytes())
                .is_err()
            {
                return Err(ValidationError::InvalidImage);
            }
        }

        if let Some(history) = &self.old_messages {
            if history.len() > MAX_HISTORY_MESSAGES {
                return Err(ValidationError::HistoryTooLong);
            }
        }

        if let Some(name) = self.model.as_deref() {
            if ModelTier::parse(name).is_none() {
                return Err(ValidationError::UnknownTier(name.to_string()));
            }
        }

        Ok(())
    }

    /// Normalize into a [`FilterRequest`] together with the validation
    /// outcome. The request is usable for cache-key building even when
    /// validation failed; the pipeline rejects it at its validation stage,
    /// after the cache and rate-limit stages have run.
    pub fn into_request_lenient(self) -> (FilterRequest, Result<(), ValidationError>) {
        let validation = self.validate();

        let request = FilterRequest {
            text: self.text.filter(|t| !t.is_empty()),
            image: self.image.filter(|i| !i.is_empty()),
            config: self.config.normalize(),
            history: self
                .old_messages
                .unwrap_or_default()
                .into_iter()
                .map(HistoryMessage::into_text)
                .collect(),
            tier: self
                .model
                .as_deref()
                .and_then(ModelTier::parse)
                .unwrap_or(ModelTier::Normal),
        };

        (request, validation)
    }

    /// Validate and normalize into a [`FilterRequest`].
    pub fn into_request(self) -> Result<FilterRequest, ValidationError> {
        let (request, validation) = self.into_request_lenient();
        validation.map(|()| request)
    }
}

// ============================================================================
// Results
// ============================================================================

/// The verdict returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    /// Whether the content was blocked
    pub blocked: bool,

    /// Content-category flags
    pub flags: Vec<Flag>,

    /// Human-readable reason, never containing raw sensitive matches
    pub reason: String,

    /// Redacted input, present iff `returnFilteredMessage` was set and a
    /// violation was detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_content: Option<String>,
}

impl FilterResult {
    /// A clean allow verdict.
    pub fn allowed() -> Self {
        Self {
            blocked: false,
            flags: Vec::new(),
            reason: "Content passed all moderation checks".to_string(),
            filtered_content: None,
        }
    }

    /// The allow-with-error verdict used when the AI stage fails.
    pub fn ai_failure() -> Self {
        Self {
            blocked: false,
            flags: vec![Flag::Error],
            reason: "AI analysis failed, allowing content as a precaution".to_string(),
            filtered_content: None,
        }
    }

    /// Whether this result may populate the AI-result cache.
    pub fn is_cacheable(&self) -> bool {
        !self.flags.contains(&Flag::Error)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_wire_strings() {
        assert_eq!(
            serde_json::to_string(&Flag::PhoneNumber).unwrap(),
            "\"phone_number\""
        );
        assert_eq!(serde_json::to_string(&Flag::Error).unwrap(), "\"error\"");
        assert_eq!(Flag::parse("creditCard"), Some(Flag::CreditCard));
        assert_eq!(Flag::parse("nonsense"), None);
    }

    #[test]
    fn test_config_defaults_false() {
        let config: FilterConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.allow_phone);
        assert!(!config.return_filtered_message);
    }

    #[test]
    fn test_config_coerces_non_true_values() {
        let config: FilterConfig = serde_json::from_str(
            r#"{"allowPhone": "yes", "allowEmail": 1, "allowAbuse": null, "returnFilteredMessage": true}"#,
        )
        .unwrap();
        assert!(!config.allow_phone);
        assert!(!config.allow_email);
        assert!(!config.allow_abuse);
        assert!(config.return_filtered_message);
    }

    #[test]
    fn test_config_ignores_unknown_fields() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"allowPhone": true, "allowTelepathy": true}"#).unwrap();
        assert!(config.allow_phone);
    }

    #[test]
    fn test_normalize_idempotent() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"allowEmail": true}"#).unwrap();
        assert_eq!(config.normalize(), config.normalize().normalize());
        assert_eq!(
            config.normalize().canonical_string(),
            config.normalize().normalize().canonical_string()
        );
    }

    #[test]
    fn test_canonical_string_distinguishes_configs() {
        let a = FilterConfig { allow_phone: true, ..Default::default() };
        let b = FilterConfig { allow_email: true, ..Default::default() };
        assert_ne!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn test_history_message_both_forms() {
        let body: FilterRequestBody = serde_json::from_str(
            r#"{"text": "hi", "oldMessages": ["first", {"text": "second"}]}"#,
        )
        .unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.history, vec!["first", "second"]);
    }

    #[test]
    fn test_validation_requires_content() {
        let body = FilterRequestBody::default();
        assert_eq!(
            body.into_request().unwrap_err(),
            ValidationError::MissingContent
        );
    }

    #[test]
    fn test_validation_rejects_long_history() {
        let body = FilterRequestBody {
            text: Some("hello".to_string()),
            old_messages: Some(vec![HistoryMessage::Text("m".to_string()); 16]),
            ..Default::default()
        };
        assert_eq!(
            body.into_request().unwrap_err(),
            ValidationError::HistoryTooLong
        );
    }

    #[test]
    fn test_validation_rejects_bad_base64_image() {
        let body = FilterRequestBody {
            image: Some("not~~~base64!!".to_string()),
            ..Default::default()
        };
        assert_eq!(
            body.into_request().unwrap_err(),
            ValidationError::InvalidImage
        );

        let body = FilterRequestBody {
            image: Some("aGVsbG8gd29ybGQ=".to_string()),
            ..Default::default()
        };
        assert!(body.into_request().is_ok());
    }

    #[test]
    fn test_validation_rejects_unknown_tier() {
        let body = FilterRequestBody {
            text: Some("hello".to_string()),
            model: Some("turbo".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            body.into_request().unwrap_err(),
            ValidationError::UnknownTier(_)
        ));
    }

    #[test]
    fn test_filtered_content_omitted_from_wire() {
        let result = FilterResult::allowed();
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("filteredContent"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_is_idempotent(
                abuse in proptest::bool::ANY,
                phone in proptest::bool::ANY,
                email in proptest::bool::ANY,
                physical in proptest::bool::ANY,
                social in proptest::bool::ANY,
                filtered in proptest::bool::ANY,
            ) {
                let config = FilterConfig {
                    allow_abuse: abuse,
                    allow_phone: phone,
                    allow_email: email,
                    allow_physical_information: physical,
                    allow_social_information: social,
                    return_filtered_message: filtered,
                };
                prop_assert_eq!(config.normalize(), config.normalize().normalize());
            }
        }
    }
}
