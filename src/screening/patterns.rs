//! Compiled pattern tables for the pre-screener
//!
//! All regexes are compiled once at first use. The tables are sealed: the
//! pre-screener only ever consults these sets, so the deterministic stage
//! behaves identically across processes and restarts.

use once_cell::sync::Lazy;
use regex::Regex;

/// Phrases that mark short messages as small talk.
pub static BENIGN_PHRASES: &[&str] = &[
    "hello",
    "hi there",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "good night",
    "how are you",
    "thank you",
    "thanks",
    "you're welcome",
    "nice to meet you",
    "see you later",
    "have a great day",
];

/// Sensitive financial/security vocabulary that always needs review,
/// regardless of the caller's configuration.
pub static CRITICAL_TERMS: &[&str] = &[
    "password",
    "passwd",
    "social security number",
    "ssn",
    "bank account",
    "routing number",
    "account number",
    "security code",
    "pin code",
    "swift code",
    "iban",
    "one-time code",
    "otp code",
];

/// Word characters separated by runs of whitespace, the classic way to slip
/// content past keyword filters ("c a l l   m e").
pub static OBFUSCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\w\s{2,}){3,}\w").expect("obfuscation pattern"));

/// Case-insensitive matcher over [`CRITICAL_TERMS`], built once so match
/// offsets refer to the original text.
pub static CRITICAL_TERMS_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation: Vec<String> = CRITICAL_TERMS.iter().map(|t| regex::escape(t)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|"))).expect("critical terms pattern")
});

/// Case-insensitive matcher over [`OFFENSIVE_TERMS`].
pub static OFFENSIVE_TERMS_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation: Vec<String> = OFFENSIVE_TERMS.iter().map(|t| regex::escape(t)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|"))).expect("offensive terms pattern")
});

// ============================================================================
// Phone
// ============================================================================

/// International and local digit-run phone formats.
pub static PHONE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // +countrycode with separators: +1 555 123 4567, +44-20-7946-0958
        Regex::new(r"\+\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{2,4}[-.\s]?\d{2,4}[-.\s]?\d{0,4}")
            .expect("intl phone pattern"),
        // Local formats: 555-123-4567, (555) 123 4567, 555.123.4567
        Regex::new(r"\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b").expect("local phone pattern"),
        // Bare 10-11 digit runs
        Regex::new(r"\b\d{10,11}\b").expect("digit run pattern"),
    ]
});

/// Digits spelled out in words, seven or more in a row.
pub static SPELLED_DIGITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:zero|one|two|three|four|five|six|seven|eight|nine)(?:[\s,-]+(?:zero|one|two|three|four|five|six|seven|eight|nine)){6,}\b",
    )
    .expect("spelled digits pattern")
});

/// Phrases announcing an intent to share a phone number.
pub static PHONE_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:call me|text me|my (?:phone )?number is|reach me at|give me a call|whatsapp me)\b")
        .expect("phone intent pattern")
});

// ============================================================================
// Email
// ============================================================================

/// Standard email address shape.
pub static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email pattern")
});

/// Obfuscated addresses using `at`/`dot` separators.
pub static EMAIL_OBFUSCATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[\w.+\-]+\s*[\[(]?\s*at\s*[\])]?\s*[\w\-]+\s*[\[(]?\s*dot\s*[\])]?\s*[a-z]{2,}\b",
    )
    .expect("obfuscated email pattern")
});

/// Phrases announcing an intent to share an email address.
pub static EMAIL_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:email me|my email is|send (?:me )?an email|drop me a (?:mail|line) at)\b")
        .expect("email intent pattern")
});

// ============================================================================
// Abuse
// ============================================================================

/// Fixed offensive-terms list.
pub static OFFENSIVE_TERMS: &[&str] = &[
    "idiot",
    "moron",
    "stupid",
    "dumbass",
    "loser",
    "scumbag",
    "jerk",
    "asshole",
    "bastard",
    "bitch",
    "pathetic excuse",
    "worthless",
];

/// Phrases expressing hostile intent.
pub static ABUSE_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:i(?:'ll| will) (?:hurt|beat|destroy|get) you|you deserve to (?:die|suffer)|watch your back|i know where you live)\b",
    )
    .expect("abuse intent pattern")
});

// ============================================================================
// Physical information
// ============================================================================

/// Street address shape: house number plus a street-type word.
pub static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d{1,5}\s+[A-Za-z][A-Za-z0-9]*(?:\s+[A-Za-z][A-Za-z0-9]*)?\s+(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|place|pl|way)\b",
    )
    .expect("street address pattern")
});

/// 16-digit payment card numbers, with or without separators.
pub static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{4}[ \-]?){3}\d{4}\b").expect("credit card pattern"));

/// American Express 15-digit format (4-6-5 grouping).
pub static AMEX_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b3[47]\d{2}[ \-]?\d{6}[ \-]?\d{5}\b").expect("amex pattern"));

/// Three or four digits in CVV context.
pub static CVV_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:cvv|cvc|security code)\s*:?\s*\d{3,4}\b").expect("cvv pattern")
});

/// Phrases announcing an intent to share a location.
pub static PHYSICAL_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:my address is|i live (?:at|on)|come (?:to|by) my (?:house|place)|meet me at my)\b")
        .expect("physical intent pattern")
});

// ============================================================================
// Social
// ============================================================================

/// @handle mentions.
pub static SOCIAL_HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s:,])@[A-Za-z0-9_.]{2,30}\b").expect("social handle pattern")
});

/// Links to known social platforms.
pub static SOCIAL_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:instagram\.com|facebook\.com|fb\.com|twitter\.com|x\.com|tiktok\.com|snapchat\.com|t\.me|telegram\.me|discord\.gg)/[\w.\-]+",
    )
    .expect("social link pattern")
});

/// Phrases announcing an intent to connect on social platforms.
pub static SOCIAL_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:follow me on|add me on|find me on|dm me|my (?:insta|instagram|snap|tiktok|telegram|discord) is)\b",
    )
    .expect("social intent pattern")
});
