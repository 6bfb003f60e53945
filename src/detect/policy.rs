use crate::detect::result::{BinState, BoxCandidate};

/// Primary detection selection: the first box in the model's native order.
///
/// Not a confidence ranking. Backends that sort by confidence make the two
/// coincide, but nothing here relies on it.
pub fn select_primary_detection(boxes: &[BoxCandidate]) -> Option<&BoxCandidate> {
    boxes.first()
}

/// Label substrings that mark a bin as full or empty.
///
/// Matching is a case-insensitive substring test, full checked first. A label
/// that merely contains a vocabulary word still matches.
// TODO: switch to exact matching once the deployed model's label set is confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelVocabulary {
    full: Vec<String>,
    empty: Vec<String>,
}

impl LabelVocabulary {
    pub fn new<I, J, S, T>(full: I, empty: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            full: lowercase_all(full),
            empty: lowercase_all(empty),
        }
    }

    pub fn classify(&self, label: &str) -> BinState {
        let label = label.to_lowercase();
        if self.full.iter().any(|word| label.contains(word.as_str())) {
            BinState::Full
        } else if self.empty.iter().any(|word| label.contains(word.as_str())) {
            BinState::Empty
        } else {
            BinState::Unrecognized
        }
    }

    pub fn full_words(&self) -> &[String] {
        &self.full
    }

    pub fn empty_words(&self) -> &[String] {
        &self.empty
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self::new(["full", "pleine"], ["empty", "vide"])
    }
}

fn lowercase_all<I, S>(words: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|word| word.as_ref().trim().to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}
