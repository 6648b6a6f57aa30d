//! Label encoders exported alongside the classifier

use serde::Deserialize;

/// Maps categorical values to the integer codes seen during training.
///
/// Class positions are the codes, matching a fitted sklearn `LabelEncoder`
/// whose `classes_` were exported in order.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    /// Training-set mode, used as the proxy for unseen values when present
    #[serde(default)]
    most_frequent: Option<String>,
}

/// How a categorical value was resolved to its code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// The value was a known class
    Exact(usize),
    /// The value was unseen; the code of a stand-in class is returned
    Fallback(usize),
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            most_frequent: None,
        }
    }

    pub fn with_most_frequent(mut self, class: impl Into<String>) -> Self {
        self.most_frequent = Some(class.into());
        self
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Code of `value` if it is a known class
    pub fn transform(&self, value: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == value)
    }

    /// Class for `code`, if in range
    pub fn inverse_transform(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    /// Encode `value`, substituting the most frequent class (or the first
    /// class) when it was never seen in training. Never fails; an encoder
    /// without classes yields code 0.
    pub fn encode_or_fallback(&self, value: &str) -> Encoded {
        let value = value.trim();
        if let Some(code) = self.transform(value) {
            return Encoded::Exact(code);
        }

        let proxy = self
            .most_frequent
            .as_deref()
            .and_then(|class| self.transform(class))
            .unwrap_or(0);
        Encoded::Fallback(proxy)
    }
}
