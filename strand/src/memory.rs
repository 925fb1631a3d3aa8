//! Markdown memory documents with YAML frontmatter.
//!
//! Memory loading is an external collaborator; the core owns only the
//! document format: markdown with a YAML frontmatter block carrying
//! `paths`, `tags`, `priority`, and `autoLoad`, and approval records that
//! pin a document by the SHA-256 hash of its content. Parsing then
//! re-serializing yields an equivalent document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const DELIMITER: &str = "---";

/// Frontmatter fields of a memory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontmatter {
    /// Paths this memory applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Load priority; higher loads first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Whether the document loads without being asked for.
    #[serde(default)]
    pub auto_load: bool,
    /// Fields the core does not interpret, preserved through round-trips.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A parsed memory document.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDocument {
    /// Parsed frontmatter.
    pub frontmatter: Frontmatter,
    /// Markdown body, byte-exact.
    pub content: String,
}

impl MemoryDocument {
    /// Parse a document from `---`-delimited frontmatter plus body.
    ///
    /// A document without a frontmatter block parses with default
    /// frontmatter and the whole input as content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the frontmatter block is opened
    /// but never closed, or is not valid YAML.
    pub fn parse(input: &str) -> Result<Self> {
        let Some(rest) = input.strip_prefix(DELIMITER).and_then(|r| r.strip_prefix('\n')) else {
            return Ok(Self {
                frontmatter: Frontmatter::default(),
                content: input.to_owned(),
            });
        };

        let close = rest
            .find("\n---\n")
            .map(|at| (at, at + 5))
            .or_else(|| rest.strip_suffix("\n---").map(|head| (head.len(), rest.len())))
            .ok_or_else(|| Error::validation("unterminated frontmatter block"))?;

        let yaml = &rest[..close.0];
        let content = rest[close.1..].to_owned();
        let frontmatter: Frontmatter = serde_yaml::from_str(yaml)
            .map_err(|e| Error::validation(format!("invalid frontmatter: {e}")))?;

        Ok(Self {
            frontmatter,
            content,
        })
    }

    /// Serialize back to `---`-delimited frontmatter plus body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the frontmatter fails to encode.
    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.frontmatter)
            .map_err(|e| Error::validation(format!("frontmatter encode failed: {e}")))?;
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{}", self.content))
    }

    /// Hex-encoded SHA-256 of the content body.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A persisted approval of a memory document at a specific content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Path of the approved document.
    pub path: String,
    /// SHA-256 of the approved content.
    pub content_hash: String,
    /// When the approval was granted.
    pub approved_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// Record approval of `document` as found at `path`.
    #[must_use]
    pub fn grant(path: impl Into<String>, document: &MemoryDocument) -> Self {
        Self {
            path: path.into(),
            content_hash: document.content_hash(),
            approved_at: Utc::now(),
        }
    }

    /// Whether the approval still covers `document` (content unchanged).
    #[must_use]
    pub fn covers(&self, document: &MemoryDocument) -> bool {
        self.content_hash == document.content_hash()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DOC: &str = "---\npaths:\n- src/**\ntags:\n- style\npriority: 2\nautoLoad: true\n---\n# Conventions\n\nUse the project error type.\n";

    #[test]
    fn parses_frontmatter_fields() {
        let doc = MemoryDocument::parse(DOC).unwrap();
        assert_eq!(doc.frontmatter.paths, vec!["src/**"]);
        assert_eq!(doc.frontmatter.tags, vec!["style"]);
        assert_eq!(doc.frontmatter.priority, Some(2));
        assert!(doc.frontmatter.auto_load);
        assert!(doc.content.starts_with("# Conventions"));
    }

    #[test]
    fn round_trip_is_equivalent() {
        let doc = MemoryDocument::parse(DOC).unwrap();
        let rendered = doc.render().unwrap();
        let reparsed = MemoryDocument::parse(&rendered).unwrap();
        assert_eq!(reparsed.frontmatter, doc.frontmatter);
        assert_eq!(reparsed.content, doc.content);
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let input = "---\nautoLoad: false\nowner: platform-team\n---\nbody\n";
        let doc = MemoryDocument::parse(input).unwrap();
        assert!(doc.frontmatter.extra.contains_key("owner"));
        let reparsed = MemoryDocument::parse(&doc.render().unwrap()).unwrap();
        assert_eq!(reparsed.frontmatter.extra, doc.frontmatter.extra);
    }

    #[test]
    fn document_without_frontmatter() {
        let doc = MemoryDocument::parse("just markdown\n").unwrap();
        assert_eq!(doc.frontmatter, Frontmatter::default());
        assert_eq!(doc.content, "just markdown\n");
    }

    #[test]
    fn unterminated_frontmatter_is_rejected() {
        let err = MemoryDocument::parse("---\npaths: []\nno closing fence").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        let a = MemoryDocument::parse(DOC).unwrap();
        let b = MemoryDocument::parse(DOC).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());

        let mut c = a.clone();
        c.content.push('!');
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn approval_covers_until_content_changes() {
        let doc = MemoryDocument::parse(DOC).unwrap();
        let approval = ApprovalRecord::grant("memory/conventions.md", &doc);
        assert!(approval.covers(&doc));

        let mut edited = doc.clone();
        edited.content = "# Conventions\n\nChanged.\n".to_owned();
        assert!(!approval.covers(&edited));
    }
}
