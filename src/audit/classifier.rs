//! Classification collaborator interface.
//!
//! The proxy does not decide what is malicious. A [`Classifier`] looks at each
//! forwarded message and either lets it pass or returns the tags that explain
//! why it was flagged.

use crate::audit::event::{AttackClassifier, ClassifierSet, GeoData, Metadata};
use crate::session::{Direction, SessionInfo};

/// One completed, forwarded message.
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    pub session: &'a SessionInfo,
    pub direction: Direction,
    pub message: &'a [u8],
}

/// Details attached to a flagged exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Flagged {
    pub classifiers: ClassifierSet,
    pub geolocation: Option<GeoData>,
    pub metadata: Option<Metadata>,
}

impl Flagged {
    pub fn new(classifiers: ClassifierSet) -> Self {
        Self {
            classifiers,
            geolocation: None,
            metadata: None,
        }
    }
}

impl From<AttackClassifier> for Flagged {
    fn from(classifier: AttackClassifier) -> Self {
        Self::new(ClassifierSet::single(classifier))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Benign,
    Flagged(Flagged),
}

/// Advisory input to the audit emitter. Implementations must not block.
pub trait Classifier: Send + Sync {
    fn classify(&self, exchange: &Exchange<'_>) -> Verdict;
}

/// Classifier that flags nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Classifier for PassThrough {
    fn classify(&self, _exchange: &Exchange<'_>) -> Verdict {
        Verdict::Benign
    }
}
