use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CantoError;

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<tag>[A-Za-z][A-Za-z0-9_]*)(?P<op>[<>=]?):(?P<value>.+)$")
        .expect("filter term pattern is valid")
});

/// Catalog-wide identifier of a recording. Stable across queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = CantoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(CantoError::InvalidRecordId(value.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CantoError::InvalidRecordId(value.to_string()))
    }
}

// The catalog serves identifiers as JSON strings; older dumps use numbers.
impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Lenient::deserialize(deserializer)? {
            Lenient::Number(value) => Ok(Self(value)),
            Lenient::Text(value) => value.parse().map_err(D::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(u64),
    Text(String),
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Lenient::deserialize(deserializer)? {
        Lenient::Number(value) => Ok(value),
        Lenient::Text(value) => value.trim().parse().map_err(D::Error::custom),
    }
}

/// One catalog entry. `en` is the category label, `file` the asset URL; every
/// other field returned by the catalog is kept verbatim in `tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub file: String,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Value>,
}

impl Record {
    /// Folder name for this record's assets: the label with whitespace removed.
    pub fn category(&self) -> String {
        let name: String = self.en.chars().filter(|ch| !ch.is_whitespace()).collect();
        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name
        }
    }

    pub fn asset_url(&self) -> String {
        if self.file.starts_with("//") {
            format!("https:{}", self.file)
        } else {
            self.file.clone()
        }
    }

    pub fn tag_value(&self, tag: &str) -> Option<Cow<'_, str>> {
        match tag {
            "id" => Some(Cow::Owned(self.id.to_string())),
            "en" => Some(Cow::Borrowed(self.en.as_str())),
            "file" => Some(Cow::Borrowed(self.file.as_str())),
            _ => match self.tags.get(tag)? {
                Value::String(value) => Some(Cow::Borrowed(value.as_str())),
                Value::Number(value) => Some(Cow::Owned(value.to_string())),
                Value::Bool(value) => Some(Cow::Owned(value.to_string())),
                _ => None,
            },
        }
    }
}

/// One page of a catalog query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    #[serde(deserialize_with = "lenient_count")]
    pub num_recordings: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub num_pages: u64,
    #[serde(default)]
    pub recordings: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    Matches,
    Exact,
    Less,
    Greater,
}

impl TermOp {
    fn symbol(self) -> &'static str {
        match self {
            TermOp::Matches => "",
            TermOp::Exact => "=",
            TermOp::Less => "<",
            TermOp::Greater => ">",
        }
    }
}

/// A single `tag[op]:value` constraint. The value keeps its quotes so the
/// remote catalog sees multi-word values as one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTerm {
    tag: String,
    op: TermOp,
    value: String,
}

impl FilterTerm {
    pub fn op(&self) -> TermOp {
        self.op
    }

    pub fn unquoted_value(&self) -> &str {
        self.value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(&self.value)
    }
}

impl fmt::Display for FilterTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", self.tag, self.op.symbol(), self.value)
    }
}

impl FromStr for FilterTerm {
    type Err = CantoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let caps = TERM_RE
            .captures(trimmed)
            .ok_or_else(|| CantoError::InvalidFilterTerm(value.to_string()))?;
        let raw = caps["value"].trim();
        let quoted_ok = match (raw.starts_with('"'), raw.ends_with('"')) {
            (true, true) => raw.len() >= 2,
            (false, false) => true,
            _ => false,
        };
        if raw.is_empty() || !quoted_ok {
            return Err(CantoError::InvalidFilterTerm(value.to_string()));
        }
        let op = match &caps["op"] {
            "<" => TermOp::Less,
            ">" => TermOp::Greater,
            "=" => TermOp::Exact,
            _ => TermOp::Matches,
        };
        Ok(Self {
            tag: caps["tag"].to_string(),
            op,
            value: raw.to_string(),
        })
    }
}

/// An ordered, non-empty set of terms identifying a catalog subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<FilterTerm>,
}

impl Filter {
    pub fn parse<S: AsRef<str>>(terms: &[S]) -> Result<Self, CantoError> {
        if terms.is_empty() {
            return Err(CantoError::EmptyFilter);
        }
        let terms = terms
            .iter()
            .map(|term| term.as_ref().parse())
            .collect::<Result<Vec<FilterTerm>, _>>()?;
        Ok(Self { terms })
    }

    /// Single-record lookup by catalog number.
    pub fn by_id(id: RecordId) -> Self {
        Self {
            terms: vec![FilterTerm {
                tag: "nr".to_string(),
                op: TermOp::Matches,
                value: id.to_string(),
            }],
        }
    }

    pub fn terms(&self) -> &[FilterTerm] {
        &self.terms
    }

    /// Query string form: spaces become `%20`, colons and quotes are kept.
    pub fn url_query(&self) -> String {
        self.terms
            .iter()
            .map(|term| term.to_string().replace(' ', "%20"))
            .collect::<Vec<_>>()
            .join("%20")
    }

    /// Filesystem-safe identity of this filter's query cache.
    pub fn cache_key(&self) -> String {
        self.terms
            .iter()
            .map(|term| {
                term.to_string()
                    .replace(' ', "")
                    .replace(':', "_")
                    .replace('"', "")
            })
            .collect()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .terms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{rendered}")
    }
}

/// Conjunction of equality clauses evaluated against indexed records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPredicate {
    clauses: Vec<(String, String)>,
}

impl TagPredicate {
    pub fn parse<S: AsRef<str>>(terms: &[S]) -> Result<Self, CantoError> {
        let mut clauses = Vec::with_capacity(terms.len());
        for term in terms {
            let term: FilterTerm = term.as_ref().parse()?;
            if term.op != TermOp::Matches {
                return Err(CantoError::UnsupportedPredicate(term.to_string()));
            }
            let mut value = term.unquoted_value().to_string();
            // Labels with spaces are passed as `en:American_Robin` on the command line.
            if term.tag == "en" {
                value = value.replace('_', " ");
            }
            clauses.push((term.tag, value));
        }
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// An empty predicate matches nothing.
    pub fn matches(&self, record: &Record) -> bool {
        !self.clauses.is_empty()
            && self.clauses.iter().all(|(tag, expected)| {
                record
                    .tag_value(tag)
                    .is_some_and(|actual| actual.as_ref() == expected)
            })
    }
}
