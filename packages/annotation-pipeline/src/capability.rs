//! Capabilities: the typed data items stages require and produce.
//!
//! A [`Capability`] is just a name. A [`CapabilityKey`] binds that name to the
//! Rust type stored under it in a [`DocumentContext`](crate::DocumentContext),
//! so once a stage writes `TOKENS` every later stage reads a `Vec<Token>`.

use crate::context::{Sentence, Token};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(&'static str);

impl Capability {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

/// Capability bound to its value type
pub struct CapabilityKey<T> {
    capability: Capability,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CapabilityKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            capability: Capability::new(name),
            _marker: PhantomData,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }
}

impl<T> Clone for CapabilityKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CapabilityKey<T> {}

impl<T> fmt::Debug for CapabilityKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityKey({})", self.capability)
    }
}

// ═══════════════════════════════════════════════════════════════
// Standard capabilities
// ═══════════════════════════════════════════════════════════════

pub const TOKENS: CapabilityKey<Vec<Token>> = CapabilityKey::new("tokens");
pub const SENTENCES: CapabilityKey<Vec<Sentence>> = CapabilityKey::new("sentences");
/// One tag per token
pub const POS: CapabilityKey<Vec<String>> = CapabilityKey::new("pos");
/// One lemma per token
pub const LEMMA: CapabilityKey<Vec<String>> = CapabilityKey::new("lemma");

pub const CLEAN_XML: Capability = Capability::new("clean_xml");
pub const NER: Capability = Capability::new("ner");
pub const FINE_NER: Capability = Capability::new("fine_ner");
pub const ENTITY_MENTIONS: Capability = Capability::new("entity_mentions");
pub const TRUECASE: Capability = Capability::new("truecase");
pub const PARSE: Capability = Capability::new("parse");
pub const DEPENDENCIES: Capability = Capability::new("dependencies");
pub const SENTIMENT: Capability = Capability::new("sentiment");
pub const NATLOG: Capability = Capability::new("natlog");
pub const OPENIE: Capability = Capability::new("openie");
pub const QUOTES: Capability = Capability::new("quotes");
pub const MENTIONS: Capability = Capability::new("mentions");
pub const COREF: Capability = Capability::new("coref");
pub const RELATIONS: Capability = Capability::new("relations");

/// Build a capability set from a list
pub fn set_of(capabilities: &[Capability]) -> CapabilitySet {
    capabilities.iter().copied().collect()
}
