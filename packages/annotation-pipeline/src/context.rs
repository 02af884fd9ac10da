use crate::capability::{Capability, CapabilityKey};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A token with character offsets into the document text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub begin: usize,
    pub end: usize,
}

/// A sentence as a half-open token range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub token_begin: usize,
    pub token_end: usize,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.token_end - self.token_begin
    }

    pub fn is_empty(&self) -> bool {
        self.token_end == self.token_begin
    }
}

/// Mutable state passed through a pipeline run
///
/// Values are keyed by capability. On stage failure the context keeps
/// whatever was written so far and gains an error in [`last_error`](Self::last_error);
/// nothing is rolled back.
pub struct DocumentContext {
    id: Uuid,
    text: String,
    values: HashMap<Capability, Box<dyn Any + Send + Sync>>,
    last_error: Option<PipelineError>,
}

impl DocumentContext {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            values: HashMap::new(),
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: CapabilityKey<T>, value: T) {
        self.values.insert(key.capability(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: CapabilityKey<T>) -> Option<&T> {
        self.values
            .get(&key.capability())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: CapabilityKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(&key.capability())
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn take<T: Any + Send + Sync>(&mut self, key: CapabilityKey<T>) -> Option<T> {
        let boxed = self.values.remove(&key.capability())?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(original) => {
                // wrong type: leave the slot as it was
                self.values.insert(key.capability(), original);
                None
            }
        }
    }

    /// Record a capability that carries no value of its own
    pub fn mark(&mut self, capability: Capability) {
        self.values.insert(capability, Box::new(()));
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.values.contains_key(&capability)
    }

    /// Present capabilities, sorted by name
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<_> = self.values.keys().copied().collect();
        caps.sort();
        caps
    }

    pub fn record_error(&mut self, error: PipelineError) {
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PipelineError> {
        self.last_error.take()
    }

    pub fn is_failed(&self) -> bool {
        self.last_error.is_some()
    }
}

impl fmt::Debug for DocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentContext")
            .field("id", &self.id)
            .field("text_len", &self.text.len())
            .field("capabilities", &self.capabilities())
            .field("last_error", &self.last_error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}
