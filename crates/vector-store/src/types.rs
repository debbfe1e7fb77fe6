use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form string metadata stored beside a vector
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    /// Text the vector was computed from; an identical re-upsert reuses the vector
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}
