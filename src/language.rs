use serde::{Deserialize, Serialize};

/// Filter entry that matches every subtitle stream
pub const WILDCARD: &str = "*";

/// Language selector -> tags a prober may emit for it
const ALIASES: &[(&str, &[&str])] = &[
    ("pt", &["por", "pt"]),
    ("pt-BR", &["por", "pb", "pt-BR"]),
    ("en", &["eng", "en"]),
    ("es", &["spa", "es"]),
    ("fr", &["fra", "fre", "fr"]),
    ("de", &["deu", "ger", "de"]),
    ("it", &["ita", "it"]),
    ("ja", &["jpn", "ja"]),
    ("zh", &["zho", "chi", "zh"]),
];

/// Tags a selector resolves to. Unknown selectors resolve to themselves.
pub fn aliases_for(selector: &str) -> Vec<&str> {
    ALIASES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(selector))
        .map(|(_, tags)| tags.to_vec())
        .unwrap_or_else(|| vec![selector])
}

/// Ordered, de-duplicated set of user-selected language codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LanguageFilterSet {
    codes: Vec<String>,
}

impl LanguageFilterSet {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for code in codes {
            set.insert(code);
        }
        set
    }

    /// Parse a comma-separated list such as `pt-BR,en`
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn wildcard() -> Self {
        Self::new([WILDCARD])
    }

    pub fn insert<S: Into<String>>(&mut self, code: S) {
        let code = code.into();
        if !self.codes.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
            self.codes.push(code);
        }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.codes.iter().any(|c| c == WILDCARD)
    }

    /// Whether a stream language tag is selected by this set.
    ///
    /// The wildcard accepts anything, including a missing tag. Otherwise the tag
    /// must equal one of the aliases of one of the codes, ignoring case.
    pub fn matches(&self, language: Option<&str>) -> bool {
        if self.has_wildcard() {
            return true;
        }
        let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) else {
            return false;
        };
        self.codes.iter().any(|code| {
            aliases_for(code)
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(language))
        })
    }
}

impl From<Vec<String>> for LanguageFilterSet {
    fn from(codes: Vec<String>) -> Self {
        Self::new(codes)
    }
}

impl From<LanguageFilterSet> for Vec<String> {
    fn from(set: LanguageFilterSet) -> Self {
        set.codes
    }
}

impl std::fmt::Display for LanguageFilterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.codes.join(","))
    }
}
