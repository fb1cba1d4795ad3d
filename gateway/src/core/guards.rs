//! Short-circuit rules applied to recognized text before generation.
//!
//! Each [`GuardRule`] inspects the user's utterance and may answer it with a
//! fixed reply, in which case retrieval and generation are skipped for the
//! turn. Rules run in order and the first match wins.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reply used when the transcript comes back empty
pub const CLARIFICATION_REPLY: &str = "I didn't catch that\u{2014}could you repeat?";

const NON_ENGLISH_REPLY: &str =
    "Let's keep this in English, please. Could you say that again in English?";
const BANNED_PHRASE_REPLY: &str =
    "Let's stay focused on our conversation. What else would you like to know?";
const DUPLICATE_REPLY: &str =
    "I think I already heard that. Is there anything else you'd like to ask?";
const GENERIC_GREETING_REPLY: &str = "Hi there. What would you like to discuss?";

/// Sign-off phrases a role-play call should never contain.
pub const DEFAULT_BANNED_PHRASES: &[&str] = &[
    "thanks for watching",
    "thank you for watching",
    "like and subscribe",
    "see you in the next video",
];

/// Which rule produced a guard reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    NonEnglish,
    BannedPhrase,
    Duplicate,
    ShortGreeting,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonEnglish => "non_english",
            Self::BannedPhrase => "banned_phrase",
            Self::Duplicate => "duplicate",
            Self::ShortGreeting => "short_greeting",
        }
    }
}

/// A canned reply that replaces generation for this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReply {
    pub kind: GuardKind,
    pub text: String,
}

impl GuardReply {
    fn new(kind: GuardKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// What a rule gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    /// Trimmed transcript of the current utterance
    pub text: &'a str,
    /// Normalized text of the previous user utterance, if any
    pub previous_normalized: Option<&'a str>,
    pub persona_name: Option<&'a str>,
    pub persona_role: Option<&'a str>,
}

/// A single guard rule.
pub trait GuardRule: Send + Sync {
    fn kind(&self) -> GuardKind;

    /// Return a reply when the rule applies.
    fn check(&self, ctx: &GuardContext<'_>) -> Option<GuardReply>;
}

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize_utterance(text: &str) -> String {
    let stripped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c == '\'' || c == '\u{2019}' {
                // keep contractions joined: "what's" -> "whats"
                '\0'
            } else {
                ' '
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Function words that mark an utterance as English even when the language
/// model is unsure about a short or domain-heavy sentence.
const ENGLISH_FUNCTION_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "at", "be", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "have", "how", "i", "if", "is", "it", "its", "me", "my", "not", "of",
    "on", "or", "our", "should", "that", "the", "their", "this", "to", "us", "we", "what", "when",
    "where", "which", "who", "why", "with", "would", "you", "your",
];

/// Flags utterances that are not in English.
///
/// Two signals: a high share of non-ASCII letters catches non-Latin scripts
/// at any length, and language identification catches Latin-script languages
/// once the utterance has enough words to classify.
#[derive(Debug, Clone)]
pub struct NonEnglishRule {
    /// Share of alphabetic chars that may be non-ASCII
    pub max_non_ascii_ratio: f32,
    /// Fewer words than this skip language identification
    pub min_words: usize,
    /// Share of English function words that vetoes a non-English verdict
    pub min_english_word_ratio: f32,
}

impl Default for NonEnglishRule {
    fn default() -> Self {
        Self {
            max_non_ascii_ratio: 0.3,
            min_words: 4,
            min_english_word_ratio: 0.25,
        }
    }
}

impl NonEnglishRule {
    fn foreign_script(&self, text: &str) -> bool {
        let (letters, foreign) = text
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0usize, 0usize), |(all, foreign), c| {
                (all + 1, foreign + usize::from(!c.is_ascii()))
            });
        letters > 0 && foreign as f32 / letters as f32 > self.max_non_ascii_ratio
    }

    fn foreign_language(&self, text: &str) -> bool {
        let normalized = normalize_utterance(text);
        let words: Vec<&str> = normalized
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphabetic))
            .collect();
        if words.len() < self.min_words {
            return false;
        }

        let english = words
            .iter()
            .filter(|w| ENGLISH_FUNCTION_WORDS.contains(w))
            .count();
        if english as f32 / words.len() as f32 >= self.min_english_word_ratio {
            return false;
        }

        let lang = whichlang::detect_language(text);
        if lang == whichlang::Lang::Eng {
            return false;
        }
        debug!(?lang, words = words.len(), "Utterance classified as non-English");
        true
    }
}

impl GuardRule for NonEnglishRule {
    fn kind(&self) -> GuardKind {
        GuardKind::NonEnglish
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Option<GuardReply> {
        (self.foreign_script(ctx.text) || self.foreign_language(ctx.text))
            .then(|| GuardReply::new(self.kind(), NON_ENGLISH_REPLY))
    }
}

/// Matches sign-off phrases anywhere in the utterance.
#[derive(Debug, Clone)]
pub struct BannedPhraseRule {
    phrases: Vec<String>,
}

impl BannedPhraseRule {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize_utterance(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl Default for BannedPhraseRule {
    fn default() -> Self {
        Self::new(DEFAULT_BANNED_PHRASES)
    }
}

impl GuardRule for BannedPhraseRule {
    fn kind(&self) -> GuardKind {
        GuardKind::BannedPhrase
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Option<GuardReply> {
        let normalized = normalize_utterance(ctx.text);
        self.phrases
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()))
            .then(|| GuardReply::new(self.kind(), BANNED_PHRASE_REPLY))
    }
}

/// Catches a repeat of the previous user utterance.
#[derive(Debug, Clone, Default)]
pub struct DuplicateRule;

impl GuardRule for DuplicateRule {
    fn kind(&self) -> GuardKind {
        GuardKind::Duplicate
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Option<GuardReply> {
        let previous = ctx.previous_normalized?;
        let current = normalize_utterance(ctx.text);
        (!current.is_empty() && current == previous)
            .then(|| GuardReply::new(self.kind(), DUPLICATE_REPLY))
    }
}

/// Answers trivial greetings without a model call.
#[derive(Debug, Clone)]
pub struct ShortGreetingRule {
    pub max_words: usize,
    pub max_chars: usize,
}

impl Default for ShortGreetingRule {
    fn default() -> Self {
        Self {
            max_words: 3,
            max_chars: 20,
        }
    }
}

impl ShortGreetingRule {
    /// Greeting in the persona's voice, or a neutral one without a persona card.
    pub fn greeting(name: Option<&str>, role: Option<&str>) -> String {
        match (name, role) {
            (Some(name), Some(role)) if !name.is_empty() && !role.is_empty() => {
                format!("Hi, this is {name}. What would you like to cover today?")
            }
            _ => GENERIC_GREETING_REPLY.to_string(),
        }
    }
}

impl GuardRule for ShortGreetingRule {
    fn kind(&self) -> GuardKind {
        GuardKind::ShortGreeting
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Option<GuardReply> {
        let words = ctx.text.split_whitespace().count();
        let chars = ctx.text.chars().count();
        (words > 0 && words <= self.max_words && chars <= self.max_chars).then(|| {
            GuardReply::new(
                self.kind(),
                Self::greeting(ctx.persona_name, ctx.persona_role),
            )
        })
    }
}

/// Guard toggles as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub non_english: bool,
    pub banned_phrases: bool,
    pub duplicate: bool,
    pub short_greeting: bool,
    /// Appended to the built-in sign-off list
    pub extra_banned_phrases: Vec<String>,
    pub non_english_max_ratio: f32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            non_english: true,
            banned_phrases: true,
            duplicate: true,
            short_greeting: true,
            extra_banned_phrases: Vec::new(),
            non_english_max_ratio: 0.3,
        }
    }
}

/// Ordered list of guard rules.
#[derive(Default)]
pub struct GuardPolicy {
    rules: Vec<Box<dyn GuardRule>>,
}

impl GuardPolicy {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Non-English, banned phrase, duplicate, then short greeting.
    pub fn from_config(config: &GuardConfig) -> Self {
        let mut policy = Self::empty();
        if config.non_english {
            policy.push(NonEnglishRule {
                max_non_ascii_ratio: config.non_english_max_ratio,
                ..Default::default()
            });
        }
        if config.banned_phrases {
            let phrases = DEFAULT_BANNED_PHRASES
                .iter()
                .map(|p| p.to_string())
                .chain(config.extra_banned_phrases.iter().cloned());
            policy.push(BannedPhraseRule::new(phrases));
        }
        if config.duplicate {
            policy.push(DuplicateRule);
        }
        if config.short_greeting {
            policy.push(ShortGreetingRule::default());
        }
        policy
    }

    pub fn push<R: GuardRule + 'static>(&mut self, rule: R) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn kinds(&self) -> Vec<GuardKind> {
        self.rules.iter().map(|r| r.kind()).collect()
    }

    /// First matching rule's reply.
    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> Option<GuardReply> {
        self.rules.iter().find_map(|rule| rule.check(ctx))
    }
}

impl std::fmt::Debug for GuardPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardPolicy")
            .field("rules", &self.kinds())
            .finish()
    }
}
