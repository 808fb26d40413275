//! Script-ratio language detection for Arabic/English legal text.

use serde::{Deserialize, Serialize};

/// Language tag attached to every scoped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    En,
    Mixed,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ar => "ar",
            Self::En => "en",
            Self::Mixed => "mixed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ar" => Some(Self::Ar),
            "en" => Some(Self::En),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// A node merged from chunks of differing language becomes `mixed`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::Mixed }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_arabic(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

/// Classify a text fragment as `ar`, `en`, or `mixed`.
///
/// Counts Arabic-script characters against ASCII letters; text with no
/// letters at all defaults to `en`. Deterministic and pure.
#[must_use]
pub fn detect_language(text: &str) -> Language {
    let mut arabic = 0usize;
    let mut english = 0usize;
    for c in text.chars() {
        if is_arabic(c) {
            arabic += 1;
        } else if c.is_ascii_alphabetic() {
            english += 1;
        }
    }

    let total = arabic + english;
    if total == 0 {
        return Language::En;
    }

    let ra = arabic as f64 / total as f64;
    let re = english as f64 / total as f64;

    if ra > 0.3 {
        if re > 0.2 {
            Language::Mixed
        } else {
            Language::Ar
        }
    } else if re > 0.5 {
        Language::En
    } else {
        Language::Mixed
    }
}
