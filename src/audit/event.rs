//! Audit event types.
//!
//! An [`Event`] is either an authorized request carrying an [`AccessLog`] or
//! an unauthorized request carrying a [`SecurityLog`]. The pairing is encoded
//! in the enum, so an access log can never carry classifiers and a security
//! log always carries at least one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an exchange was flagged, as reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackClassifier {
    #[serde(rename = "Anonymity")]
    Anonymity,
    #[serde(rename = "Sql Injection")]
    SqlInjection,
    #[serde(rename = "Unauthorized Access")]
    UnauthorizedAccess,
    #[serde(rename = "Ongoing ban")]
    BannedAccess,
    #[serde(rename = "Banned Geolocation")]
    BannedGeolocation,
}

impl fmt::Display for AttackClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttackClassifier::Anonymity => "Anonymity",
            AttackClassifier::SqlInjection => "Sql Injection",
            AttackClassifier::UnauthorizedAccess => "Unauthorized Access",
            AttackClassifier::BannedAccess => "Ongoing ban",
            AttackClassifier::BannedGeolocation => "Banned Geolocation",
        };
        f.write_str(label)
    }
}

/// Non-empty, order-preserving list of classifiers without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AttackClassifier>", into = "Vec<AttackClassifier>")]
pub struct ClassifierSet(Vec<AttackClassifier>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a security log needs at least one classifier")]
pub struct EmptyClassifierSet;

impl ClassifierSet {
    pub fn new(classifiers: impl IntoIterator<Item = AttackClassifier>) -> Result<Self, EmptyClassifierSet> {
        let mut unique = Vec::new();
        for classifier in classifiers {
            if !unique.contains(&classifier) {
                unique.push(classifier);
            }
        }
        if unique.is_empty() {
            return Err(EmptyClassifierSet);
        }
        Ok(Self(unique))
    }

    pub fn single(classifier: AttackClassifier) -> Self {
        Self(vec![classifier])
    }

    pub fn as_slice(&self) -> &[AttackClassifier] {
        &self.0
    }

    pub fn contains(&self, classifier: AttackClassifier) -> bool {
        self.0.contains(&classifier)
    }
}

impl TryFrom<Vec<AttackClassifier>> for ClassifierSet {
    type Error = EmptyClassifierSet;

    fn try_from(value: Vec<AttackClassifier>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClassifierSet> for Vec<AttackClassifier> {
    fn from(set: ClassifierSet) -> Self {
        set.0
    }
}

/// Location resolved for the source address.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoData {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Value shapes allowed in security log metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Fields every log carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub ip: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
}

impl Log {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            created_at: Utc::now(),
        }
    }

    /// Sorted-set score: creation time in milliseconds since the epoch.
    pub fn score(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// Record of permitted traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLog {
    #[serde(flatten)]
    pub log: Log,
}

/// Record of flagged traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityLog {
    #[serde(flatten)]
    pub log: Log,
    pub classifiers: ClassifierSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<GeoData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malicious_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl SecurityLog {
    pub fn new(log: Log, classifiers: ClassifierSet) -> Self {
        Self {
            log,
            classifiers,
            geolocation: None,
            malicious_data: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AuthorizedRequest,
    UnauthorizedRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AuthorizedRequest => "AUTHORIZED_REQUEST",
            EventKind::UnauthorizedRequest => "UNAUTHORIZED_REQUEST",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("event serialization failed: {0}")]
pub struct EventError(#[from] serde_json::Error);

/// One audit record, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "log", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    AuthorizedRequest(AccessLog),
    UnauthorizedRequest(SecurityLog),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AuthorizedRequest(_) => EventKind::AuthorizedRequest,
            Event::UnauthorizedRequest(_) => EventKind::UnauthorizedRequest,
        }
    }

    pub fn log(&self) -> &Log {
        match self {
            Event::AuthorizedRequest(access) => &access.log,
            Event::UnauthorizedRequest(security) => &security.log,
        }
    }

    /// Stable string form used as the sorted-set member.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(raw)?)
    }
}
