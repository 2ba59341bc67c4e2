//! Splits the uncached part of a document into ordered, size-bounded batches.
//! A value is never split: one that alone exceeds the budget becomes its own
//! over-budget batch. Batches remember their keys so backend lines can be
//! scattered back by position.

use serde::Deserialize;

use crate::properties::PropertiesDocument;

/// How text size is estimated against the batch budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    /// Whitespace-separated words, a rough proxy for LLM tokens.
    #[default]
    Words,
    /// Unicode scalar values.
    Chars,
}

impl SizeUnit {
    /// Estimated size of `text`. Never zero, so every value costs something.
    pub fn estimate(self, text: &str) -> usize {
        let n = match self {
            SizeUnit::Words => text.split_whitespace().count(),
            SizeUnit::Chars => text.chars().count(),
        };
        n.max(1)
    }
}

/// An ordered slice of the miss set sent in one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub keys: Vec<String>,
    pub texts: Vec<String>,
    /// Estimated size including the per-request overhead.
    pub units: usize,
}

impl Batch {
    fn new(index: usize, overhead: usize) -> Self {
        Self {
            index,
            keys: Vec::new(),
            texts: Vec::new(),
            units: overhead,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequestBuilder {
    max_units: usize,
    unit: SizeUnit,
    overhead_units: usize,
}

impl BatchRequestBuilder {
    pub fn new(max_units_per_batch: usize) -> Self {
        Self {
            max_units: max_units_per_batch.max(1),
            unit: SizeUnit::default(),
            overhead_units: 0,
        }
    }

    pub fn with_unit(mut self, unit: SizeUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Fixed cost charged to every batch for the instruction header.
    pub fn with_overhead(mut self, overhead_units: usize) -> Self {
        self.overhead_units = overhead_units;
        self
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    /// Partition `document`'s values, in order, into batches for
    /// `target_language`. The language name is part of the instruction
    /// header and is charged to every batch.
    pub fn build(&self, document: &PropertiesDocument, target_language: &str) -> Vec<Batch> {
        let overhead = self.overhead_units + self.unit.estimate(target_language);
        let mut batches = Vec::new();
        let mut current = Batch::new(0, overhead);

        for (key, text) in document.iter() {
            let cost = self.unit.estimate(text);
            if !current.is_empty() && current.units + cost > self.max_units {
                let next = Batch::new(current.index + 1, overhead);
                batches.push(std::mem::replace(&mut current, next));
            }
            current.keys.push(key.to_string());
            current.texts.push(text.to_string());
            current.units += cost;
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, &str)]) -> PropertiesDocument {
        pairs.iter().copied().collect()
    }

    fn all_keys(batches: &[Batch]) -> Vec<String> {
        batches.iter().flat_map(|b| b.keys.iter().cloned()).collect()
    }

    #[test]
    fn estimates_never_return_zero() {
        assert_eq!(SizeUnit::Words.estimate("one two  three"), 3);
        assert_eq!(SizeUnit::Words.estimate("   "), 1);
        assert_eq!(SizeUnit::Chars.estimate("ñandú"), 5);
    }

    #[test]
    fn empty_document_yields_no_batches() {
        let batches = BatchRequestBuilder::new(10).build(&PropertiesDocument::new(), "es");
        assert!(batches.is_empty());
    }

    #[test]
    fn small_document_fits_in_one_batch() {
        let input = doc(&[("a", "Good night"), ("b", "Good morning")]);
        let batches = BatchRequestBuilder::new(100).build(&input, "es");

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].keys, vec!["a", "b"]);
        assert_eq!(batches[0].texts, vec!["Good night", "Good morning"]);
        assert_eq!(batches[0].units, 1 + 4);
    }

    #[test]
    fn starts_new_batch_when_next_value_would_exceed_budget() {
        let input = doc(&[
            ("a", "one two"),
            ("b", "three four"),
            ("c", "five six"),
            ("d", "seven"),
        ]);
        // Overhead: 1 word for the language name.
        let batches = BatchRequestBuilder::new(5).build(&input, "es");

        let keys: Vec<Vec<String>> = batches.iter().map(|b| b.keys.clone()).collect();
        assert_eq!(keys, vec![vec!["a", "b"], vec!["c", "d"]]);
        assert!(batches.iter().all(|b| b.units <= 5));
        assert_eq!(batches.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn oversized_value_gets_its_own_batch_unsplit() {
        let long = "w ".repeat(50);
        let input = doc(&[("a", "short"), ("big", long.as_str()), ("c", "tail")]);
        let batches = BatchRequestBuilder::new(10).build(&input, "es");

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].keys, vec!["big"]);
        assert_eq!(batches[1].texts[0], long);
        assert!(batches[1].units > 10);
    }

    #[test]
    fn overhead_is_charged_per_batch() {
        let input = doc(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let batches = BatchRequestBuilder::new(4)
            .with_overhead(2)
            .build(&input, "es");

        // 2 overhead + 1 language + 1 per value: one value per batch.
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.units == 4));
    }

    #[test]
    fn concatenated_keys_equal_document_order() {
        let pairs: Vec<(String, String)> = (0..37)
            .map(|i| (format!("key{i}"), "word ".repeat(i % 5 + 1)))
            .collect();
        let input: PropertiesDocument = pairs.iter().cloned().collect();

        for budget in [1, 3, 7, 20, 1000] {
            for unit in [SizeUnit::Words, SizeUnit::Chars] {
                let batches = BatchRequestBuilder::new(budget).with_unit(unit).build(&input, "de");
                let expected: Vec<String> = input.keys().map(str::to_string).collect();
                assert_eq!(all_keys(&batches), expected, "budget {budget}, unit {unit:?}");
                assert!(batches.iter().all(|b| b.keys.len() == b.texts.len()));
            }
        }
    }

    #[test]
    fn zero_budget_is_clamped_to_one_value_per_batch() {
        let input = doc(&[("a", "x"), ("b", "y")]);
        let builder = BatchRequestBuilder::new(0);
        assert_eq!(builder.max_units(), 1);
        assert_eq!(builder.build(&input, "es").len(), 2);
    }
}
