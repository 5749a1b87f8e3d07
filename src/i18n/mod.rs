//! Message catalogue
//!
//! One JSON catalogue per supported language, compiled into the binary.
//! Lookups never fail: a missing key comes back unchanged.
//!
//! Placeholders use `{Name}` syntax and are filled by [`tf`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::LazyLock;

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Tr,
    En,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Tr => "tr",
            Lang::En => "en",
        }
    }

    /// Parse a language tag, accepting regional variants ("en-US", "tr_TR").
    pub fn parse(tag: &str) -> Option<Self> {
        let primary = tag
            .trim()
            .split(['-', '_', ';'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "tr" => Some(Lang::Tr),
            "en" => Some(Lang::En),
            _ => None,
        }
    }

    /// Pick the first supported language from an `Accept-Language` header.
    pub fn from_accept_language(header: &str) -> Option<Self> {
        header.split(',').find_map(Lang::parse)
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static CATALOGUES: LazyLock<HashMap<Lang, HashMap<String, String>>> = LazyLock::new(|| {
    let mut catalogues = HashMap::new();
    for (lang, raw) in [
        (Lang::Tr, include_str!("locales/tr.json")),
        (Lang::En, include_str!("locales/en.json")),
    ] {
        match serde_json::from_str::<HashMap<String, String>>(raw) {
            Ok(messages) => {
                catalogues.insert(lang, messages);
            }
            Err(e) => {
                tracing::error!(lang = %lang, "Failed to parse message catalogue: {}", e);
                catalogues.insert(lang, HashMap::new());
            }
        }
    }
    catalogues
});

/// Process-wide fallback language (set from `GOREV_LANG`, changeable at runtime)
static DEFAULT_LANG: AtomicU8 = AtomicU8::new(0);

pub fn set_default_lang(lang: Lang) {
    DEFAULT_LANG.store(lang as u8, Ordering::Relaxed);
}

pub fn default_lang() -> Lang {
    match DEFAULT_LANG.load(Ordering::Relaxed) {
        1 => Lang::En,
        _ => Lang::Tr,
    }
}

/// Translate `key`; returns the key itself when the catalogue has no entry.
pub fn t(lang: Lang, key: &str) -> String {
    CATALOGUES
        .get(&lang)
        .and_then(|messages| messages.get(key))
        .cloned()
        .unwrap_or_else(|| key.to_string())
}

/// Translate `key` and substitute `{Name}` placeholders.
pub fn tf(lang: Lang, key: &str, args: &[(&str, &str)]) -> String {
    let mut message = t(lang, key);
    for (name, value) in args {
        message = message.replace(&format!("{{{name}}}"), value);
    }
    message
}
