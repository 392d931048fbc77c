use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sentinel code meaning "every country"
pub const ALL_COUNTRIES: &str = "ALL";

/// Countries whose bans trigger an alert
///
/// Persisted as a list of ISO codes, `["ALL"]` for the sentinel. An empty
/// list always becomes [`AlertCountries::All`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum AlertCountries {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl AlertCountries {
    /// Build from raw codes: trimmed, upper-cased, deduplicated
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for code in codes {
            let code = code.as_ref().trim().to_ascii_uppercase();
            if code == ALL_COUNTRIES {
                return AlertCountries::All;
            }
            if !code.is_empty() {
                set.insert(code);
            }
        }
        AlertCountries::Only(set).normalized()
    }

    /// Collapse an empty set, or one holding the sentinel, into `All`
    pub fn normalized(self) -> Self {
        if self.is_all() {
            AlertCountries::All
        } else {
            self
        }
    }

    pub fn is_all(&self) -> bool {
        match self {
            AlertCountries::All => true,
            AlertCountries::Only(set) => set.is_empty() || set.contains(ALL_COUNTRIES),
        }
    }

    /// Whether a ban from `country` should raise an alert
    pub fn matches(&self, country: &str) -> bool {
        match self {
            AlertCountries::Only(set) if !self.is_all() => {
                set.contains(&country.trim().to_ascii_uppercase())
            }
            _ => true,
        }
    }

    /// Codes in sorted order, `["ALL"]` for the sentinel
    pub fn codes(&self) -> Vec<String> {
        match self {
            AlertCountries::Only(set) if !self.is_all() => set.iter().cloned().collect(),
            _ => vec![ALL_COUNTRIES.to_string()],
        }
    }

    /// Codes that are not two ASCII letters
    pub(crate) fn invalid_codes(&self) -> Vec<&str> {
        match self {
            AlertCountries::Only(set) if !self.is_all() => set
                .iter()
                .filter(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_alphabetic()))
                .map(String::as_str)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Vec<String>> for AlertCountries {
    fn from(codes: Vec<String>) -> Self {
        AlertCountries::from_codes(codes)
    }
}

impl From<AlertCountries> for Vec<String> {
    fn from(countries: AlertCountries) -> Self {
        countries.codes()
    }
}
