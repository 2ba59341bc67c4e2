//! i18n properties documents: ordered `key=value` pairs.
//! Key order is the only correlation between a batch request and the lines the
//! backend sends back, so every accessor here preserves insertion order.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{FormatError, FormatViolation, TranslateError};

/// Ordered key → text mapping. Keys are unique; re-inserting a key replaces
/// its value in place without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesDocument {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PropertiesDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a source document. Every non-comment, non-blank line must be
    /// `key=value` with both sides non-empty after trimming; one bad line
    /// rejects the whole input.
    pub fn parse(content: &str) -> Result<Self, FormatError> {
        parse_lines(content, false)
    }

    /// Parse a document under review, where untranslated values are blank.
    /// Keys must still be present.
    pub fn parse_for_review(content: &str) -> Result<Self, FormatError> {
        parse_lines(content, true)
    }

    /// Read and parse a UTF-8 file from disk.
    pub fn load(path: &Path) -> Result<Self, TranslateError> {
        load_file(path, false)
    }

    /// Read and parse a review file from disk (blank values allowed).
    pub fn load_for_review(path: &Path) -> Result<Self, TranslateError> {
        load_file(path, true)
    }

    /// Insert or replace. Returns the previous value if the key existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Values in document order (same order as [`keys`](Self::keys)).
    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Right-biased union: values from `other` win, keys unique to either side
    /// are kept. Keys from `self` come first, then keys only `other` has.
    pub fn merge(&self, other: &PropertiesDocument) -> PropertiesDocument {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.insert(key, value);
        }
        merged
    }

    /// Rearrange into the key order of `template`. Keys missing from `self`
    /// are skipped; keys `template` lacks are appended in their current order.
    pub fn in_order_of(&self, template: &PropertiesDocument) -> PropertiesDocument {
        let mut ordered = PropertiesDocument::new();
        for key in template.keys() {
            if let Some(value) = self.get(key) {
                ordered.insert(key, value);
            }
        }
        for (key, value) in self.iter() {
            if !ordered.contains_key(key) {
                ordered.insert(key, value);
            }
        }
        ordered
    }

    /// Render as a target file: `# <label>`, a blank line, then one
    /// `key=value` per entry. No newline after the last entry.
    pub fn serialize(&self, target_language_label: &str) -> String {
        let body: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("# {target_language_label}\n\n{}", body.join("\n"))
    }

    /// Render a blank template (`key=` per entry) for manual translation.
    pub fn serialize_template(&self, target_language_label: &str) -> String {
        let body: Vec<String> = self.keys().map(|k| format!("{k}=")).collect();
        format!("# {target_language_label}\n\n{}", body.join("\n"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertiesDocument {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = PropertiesDocument::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

fn parse_lines(content: &str, allow_empty_values: bool) -> Result<PropertiesDocument, FormatError> {
    let mut doc = PropertiesDocument::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let line_no = idx + 1;
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| FormatError::new(line_no, FormatViolation::MissingSeparator))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(FormatError::new(line_no, FormatViolation::EmptyKey));
        }
        if !allow_empty_values && value.trim().is_empty() {
            return Err(FormatError::new(line_no, FormatViolation::EmptyValue));
        }

        // Trailing whitespace is part of the text and of its cache identity.
        doc.insert(key, value.trim_start());
    }

    Ok(doc)
}

fn load_file(path: &Path, allow_empty_values: bool) -> Result<PropertiesDocument, TranslateError> {
    let content = std::fs::read_to_string(path).map_err(|e| TranslateError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let doc = parse_lines(&content, allow_empty_values).map_err(|e| e.with_file(file_name))?;
    debug!(path = %path.display(), entries = doc.len(), "properties loaded");
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let doc = PropertiesDocument::parse(
            "# English\n\nlabel=Good night\n  # indented comment\nlabel2 = Good morning\n",
        )
        .unwrap();

        assert_eq!(doc.len(), 2);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["label", "label2"]);
        assert_eq!(doc.values().collect::<Vec<_>>(), vec!["Good night", "Good morning"]);
    }

    #[test]
    fn parse_splits_on_first_separator_only() {
        let doc = PropertiesDocument::parse("formula=a=b+c").unwrap();
        assert_eq!(doc.get("formula"), Some("a=b+c"));
    }

    #[test]
    fn parse_keeps_trailing_whitespace_in_values() {
        let doc = PropertiesDocument::parse("greeting=Hello \r\n").unwrap();
        assert_eq!(doc.get("greeting"), Some("Hello "));
    }

    #[test]
    fn parse_rejects_whole_file_on_one_bad_line() {
        let err = PropertiesDocument::parse("ok=fine\nbroken line\nlater=value").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, FormatViolation::MissingSeparator);

        let err = PropertiesDocument::parse("=orphan").unwrap_err();
        assert_eq!(err.reason, FormatViolation::EmptyKey);

        let err = PropertiesDocument::parse("a=x\nempty=   ").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, FormatViolation::EmptyValue);
    }

    #[test]
    fn review_parse_accepts_blank_values_but_not_blank_keys() {
        let doc = PropertiesDocument::parse_for_review("a=uno\nb=\n").unwrap();
        assert_eq!(doc.get("b"), Some(""));

        let err = PropertiesDocument::parse_for_review(" =value").unwrap_err();
        assert_eq!(err.reason, FormatViolation::EmptyKey);
    }

    #[test]
    fn duplicate_key_keeps_first_position_and_last_value() {
        let doc = PropertiesDocument::parse("a=1\nb=2\na=3").unwrap();
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some("3"));
    }

    #[test]
    fn serialize_writes_header_and_no_trailing_newline() {
        let doc: PropertiesDocument =
            [("label", "Buenas noches"), ("label2", "Buenos dias")].into_iter().collect();
        assert_eq!(
            doc.serialize("Spanish"),
            "# Spanish\n\nlabel=Buenas noches\nlabel2=Buenos dias"
        );
        assert_eq!(doc.serialize_template("es"), "# es\n\nlabel=\nlabel2=");
    }

    #[test]
    fn serialized_output_parses_back_to_the_same_document() {
        let doc: PropertiesDocument = [("a", "uno"), ("b", "dos")].into_iter().collect();
        let reparsed = PropertiesDocument::parse(&doc.serialize("es")).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn merge_is_right_biased_and_keeps_unique_keys() {
        let left: PropertiesDocument = [("a", "1"), ("b", "2")].into_iter().collect();
        let right: PropertiesDocument = [("b", "20"), ("c", "30")].into_iter().collect();

        let merged = left.merge(&right);
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(merged.get("b"), Some("20"));
    }

    #[test]
    fn in_order_of_follows_template_order() {
        let template: PropertiesDocument = [("x", ""), ("y", ""), ("z", "")].into_iter().collect();
        let scrambled: PropertiesDocument = [("z", "3"), ("x", "1"), ("y", "2")].into_iter().collect();

        let ordered = scrambled.in_order_of(&template);
        assert_eq!(ordered.keys().collect::<Vec<_>>(), vec!["x", "y", "z"]);
        assert_eq!(ordered.values().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[test]
    fn load_reports_file_name_on_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages_en.properties");
        std::fs::write(&path, "good=yes\nbad\n").unwrap();

        match PropertiesDocument::load(&path) {
            Err(TranslateError::Format(e)) => {
                assert_eq!(e.file.as_deref(), Some("messages_en.properties"));
                assert_eq!(e.line, 2);
            }
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PropertiesDocument::load(&dir.path().join("nope.properties"));
        assert!(matches!(result, Err(TranslateError::Io { .. })));
    }
}
