//! # Pattern Pre-Screener
//!
//! The cheapest stage of the filter pipeline: a pure-function scan over the
//! request text that either clears the content without an AI call or flags
//! it as a likely violation that the AI stage should confirm.
//!
//! Rules run in a fixed short-circuit order:
//!
//! 1. Empty / fewer than three tokens → clear
//! 2. Short small-talk text → still runs every disallowed-content check
//! 3. Critical financial/security terms → review, regardless of config
//! 4. Whitespace obfuscation → review
//! 5. Per-category pattern sets, skipped entirely for categories the
//!    caller's config allows (no false positives for permitted content)
//! 6. Nothing matched → clear
//!
//! Match positions are collected so the pipeline can redact them when the
//! caller asked for `returnFilteredMessage`.

use regex::Regex;

use crate::pipeline::request::{FilterConfig, Flag};

pub mod patterns;
pub mod redact;

/// Outcome of the deterministic pre-screen pass.
#[derive(Debug, Clone, Default)]
pub struct PreScreenOutcome {
    /// Whether the AI stage should look at this text
    pub needs_ai_review: bool,

    /// Flags for every matched category
    pub flags: Vec<Flag>,

    /// Short human-readable reason, free of raw matched content
    pub reason: Option<String>,

    /// Byte spans of sensitive matches, for redaction
    pub matches: Vec<(usize, usize)>,
}

impl PreScreenOutcome {
    fn clear() -> Self {
        Self::default()
    }
}

/// Deterministic regex + keyword + intent-phrase scanner.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreScreener;

impl PreScreener {
    /// Create a screener. All pattern tables are process-wide statics, so
    /// this is free.
    pub fn new() -> Self {
        Self
    }

    /// Scan `text` under the normalized `config`.
    pub fn screen(&self, text: &str, config: &FilterConfig) -> PreScreenOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.split_whitespace().count() < 3 {
            return PreScreenOutcome::clear();
        }

        // Short small-talk is recognized but never waved through: every
        // disallowed-content check below still runs against it.
        let lowered = trimmed.to_lowercase();
        let benign_small_talk = trimmed.len() < 50
            && patterns::BENIGN_PHRASES
                .iter()
                .any(|phrase| lowered.contains(phrase));

        // Critical terms escalate regardless of configuration.
        if let Some(m) = patterns::CRITICAL_TERMS_RE.find(text) {
            return PreScreenOutcome {
                needs_ai_review: true,
                flags: vec![Flag::CriticalTerm],
                reason: Some(format!(
                    "contains critical term: {}",
                    m.as_str().to_lowercase()
                )),
                matches: vec![(m.start(), m.end())],
            };
        }

        if let Some(m) = patterns::OBFUSCATION.find(text) {
            return PreScreenOutcome {
                needs_ai_review: true,
                flags: vec![Flag::Obfuscation],
                reason: Some("text uses spacing to obscure its content".to_string()),
                matches: vec![(m.start(), m.end())],
            };
        }

        let mut scan = CategoryScan::default();

        if !config.allow_phone {
            scan.check_phone(text);
        }
        if !config.allow_email {
            scan.check_email(text);
        }
        if !config.allow_abuse {
            scan.check_abuse(text);
        }
        if !config.allow_physical_information {
            scan.check_physical(text);
        }
        if !config.allow_social_information {
            scan.check_social(text);
        }

        let outcome = scan.into_outcome();
        if benign_small_talk && !outcome.needs_ai_review {
            return PreScreenOutcome::clear();
        }
        outcome
    }
}

/// Accumulator for the per-category pattern pass.
#[derive(Debug, Default)]
struct CategoryScan {
    flags: Vec<Flag>,
    reasons: Vec<&'static str>,
    matches: Vec<(usize, usize)>,
}

impl CategoryScan {
    fn add_flag(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    fn add_reason(&mut self, reason: &'static str) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    fn record_matches(&mut self, pattern: &Regex, text: &str) -> bool {
        let mut any = false;
        for m in pattern.find_iter(text) {
            self.matches.push((m.start(), m.end()));
            any = true;
        }
        any
    }

    fn check_phone(&mut self, text: &str) {
        let mut found = false;
        for pattern in patterns::PHONE_PATTERNS.iter() {
            found |= self.record_matches(pattern, text);
        }
        found |= self.record_matches(&patterns::SPELLED_DIGITS, text);

        if found {
            self.add_flag(Flag::PhoneNumber);
            self.add_reason("detected a phone number");
        }
        if patterns::PHONE_INTENT.is_match(text) {
            self.add_flag(Flag::PhoneNumberIntent);
            self.add_reason("detected intent to share a phone number");
        }
    }

    fn check_email(&mut self, text: &str) {
        let mut found = self.record_matches(&patterns::EMAIL_PATTERN, text);
        found |= self.record_matches(&patterns::EMAIL_OBFUSCATED, text);

        if found {
            self.add_flag(Flag::EmailAddress);
            self.add_reason("detected an email address");
        }
        if patterns::EMAIL_INTENT.is_match(text) {
            self.add_flag(Flag::EmailAddressIntent);
            self.add_reason("detected intent to share an email address");
        }
    }

    fn check_abuse(&mut self, text: &str) {
        if self.record_matches(&patterns::OFFENSIVE_TERMS_RE, text) {
            self.add_flag(Flag::AbusiveLanguage);
            self.add_reason("detected abusive language");
        }
        if let Some(m) = patterns::ABUSE_INTENT.find(text) {
            self.matches.push((m.start(), m.end()));
            self.add_flag(Flag::AbusiveLanguageIntent);
            self.add_reason("detected threatening language");
        }
    }

    fn check_physical(&mut self, text: &str) {
        if self.record_matches(&patterns::STREET_ADDRESS, text) {
            self.add_flag(Flag::PhysicalAddress);
            self.add_reason("detected a street address");
        }
        let mut card = self.record_matches(&patterns::CREDIT_CARD, text);
        card |= self.record_matches(&patterns::AMEX_CARD, text);
        if card {
            self.add_flag(Flag::CreditCard);
            self.add_reason("detected a payment card number");
        }
        if self.record_matches(&patterns::CVV_CONTEXT, text) {
            self.add_flag(Flag::Cvv);
            self.add_reason("detected a card security code");
        }
        if patterns::PHYSICAL_INTENT.is_match(text) {
            self.add_flag(Flag::PhysicalInfoIntent);
            self.add_reason("detected intent to share a physical location");
        }
    }

    fn check_social(&mut self, text: &str) {
        for m in patterns::SOCIAL_HANDLE.find_iter(text) {
            // The match may include the preceding separator; mask from the
            // '@' onward.
            let at = m.as_str().find('@').unwrap_or(0);
            self.matches.push((m.start() + at, m.end()));
            self.add_flag(Flag::SocialMediaHandle);
            self.add_reason("detected a social media handle");
        }
        if self.record_matches(&patterns::SOCIAL_LINK, text) {
            self.add_flag(Flag::SocialMediaLink);
            self.add_reason("detected a social media link");
        }
        if patterns::SOCIAL_INTENT.is_match(text) {
            self.add_flag(Flag::SocialMediaIntent);
            self.add_reason("detected intent to share social media contact");
        }
    }

    fn into_outcome(self) -> PreScreenOutcome {
        if self.flags.is_empty() {
            return PreScreenOutcome::clear();
        }

        PreScreenOutcome {
            needs_ai_review: true,
            flags: self.flags,
            reason: Some(self.reasons.join("; ")),
            matches: self.matches,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
