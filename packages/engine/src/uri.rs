//! Reference parsing for regelrecht:// URIs and file-path references
//!
//! Two wire forms are accepted:
//!
//! 1. Canonical: `regelrecht://{law_id}/{output}[#{field}]`
//! 2. File-path: `regulation/{jurisdiction}/{layer}/{law_id}[#{field}]`,
//!    where the output defaults to the fragment (or the law id without one)
//!
//! Internal same-document references are written `#{output}`.
//!
//! [`build`] is the single place canonical references are produced
//! programmatically; parsing what it emits round-trips.

use crate::error::{EngineError, Result};

/// Whether a reference points inside the current document or across documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `#output` within the same regulation
    Internal,
    /// `regelrecht://` or file-path form
    External,
}

/// A parsed reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegelrechtUri {
    uri: String,
    law_id: String,
    output: String,
    field: Option<String>,
    kind: ReferenceKind,
}

impl RegelrechtUri {
    /// Parse a reference string into its components.
    pub fn parse(uri: &str) -> Result<Self> {
        // Internal reference: #output
        if let Some(output) = uri.strip_prefix('#') {
            if output.is_empty() {
                return Err(EngineError::InvalidUri(
                    "Internal reference cannot be empty".to_string(),
                ));
            }
            return Ok(Self {
                uri: uri.to_string(),
                law_id: String::new(),
                output: output.to_string(),
                field: Some(output.to_string()),
                kind: ReferenceKind::Internal,
            });
        }

        // Split off the fragment first
        let (path_part, field) = match uri.split_once('#') {
            Some((path, frag)) => (path, Some(frag.to_string())),
            None => (uri, None),
        };

        if let Some(path) = path_part.strip_prefix("regelrecht://") {
            Self::parse_canonical(uri, path, field)
        } else if path_part.starts_with("regulation/") {
            Self::parse_file_path(uri, path_part, field)
        } else {
            Err(EngineError::InvalidUri(format!(
                "must be regelrecht://, regulation/..., or #reference, got: {uri}"
            )))
        }
    }

    fn parse_canonical(original: &str, path: &str, field: Option<String>) -> Result<Self> {
        let (law_id, output) = path.split_once('/').ok_or_else(|| {
            EngineError::InvalidUri(format!(
                "regelrecht URI must contain law_id/output, got: {original}"
            ))
        })?;

        if law_id.is_empty() {
            return Err(EngineError::InvalidUri(format!(
                "law_id cannot be empty in: {original}"
            )));
        }
        if output.is_empty() {
            return Err(EngineError::InvalidUri(format!(
                "output cannot be empty in: {original}"
            )));
        }

        Ok(Self {
            uri: original.to_string(),
            law_id: law_id.to_string(),
            output: output.to_string(),
            field,
            kind: ReferenceKind::External,
        })
    }

    fn parse_file_path(original: &str, path: &str, field: Option<String>) -> Result<Self> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 4 {
            return Err(EngineError::InvalidUri(format!(
                "expected regulation/jurisdiction/layer/law_id, got: {original}"
            )));
        }

        let law_id = parts[parts.len() - 1].to_string();
        if law_id.is_empty() {
            return Err(EngineError::InvalidUri(format!(
                "law_id cannot be empty in: {original}"
            )));
        }

        // Without a fragment the output defaults to the law id itself
        let output = field.clone().unwrap_or_else(|| law_id.clone());

        Ok(Self {
            uri: original.to_string(),
            law_id,
            output,
            field,
            kind: ReferenceKind::External,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Empty for internal references.
    pub fn law_id(&self) -> &str {
        &self.law_id
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn is_internal(&self) -> bool {
        self.kind == ReferenceKind::Internal
    }
}

impl std::fmt::Display for RegelrechtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Construct a canonical `regelrecht://` reference.
///
/// This is the only way references are produced programmatically; `law_id`
/// and `output` must be non-empty.
pub fn build(law_id: &str, output: &str, field: Option<&str>) -> Result<String> {
    if law_id.is_empty() {
        return Err(EngineError::InvalidUri(
            "Cannot build URI: law_id is empty".to_string(),
        ));
    }
    if output.is_empty() {
        return Err(EngineError::InvalidUri(
            "Cannot build URI: output is empty".to_string(),
        ));
    }

    let mut uri = format!("regelrecht://{law_id}/{output}");
    if let Some(field) = field {
        if field.is_empty() {
            return Err(EngineError::InvalidUri(
                "Cannot build URI: field is empty".to_string(),
            ));
        }
        uri.push('#');
        uri.push_str(field);
    }
    Ok(uri)
}

/// Build an internal same-document reference.
pub fn internal_reference(output: &str) -> String {
    format!("#{output}")
}
