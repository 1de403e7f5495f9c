//! Configuration constants for the RegelRecht engine
//!
//! Compile-time limits that bound resource usage and recursion:
//! - Document size limits guard the YAML loader against oversized inputs
//! - Depth limits turn runaway cross-regulation cycles into clean errors

/// Maximum YAML document size in bytes (1 MB).
///
/// Typical regulation documents are 10-100 KB.
pub const MAX_YAML_SIZE: usize = 1_000_000;

/// Maximum number of elements in any array within a regulation document.
pub const MAX_ARRAY_SIZE: usize = 1_000;

/// Maximum depth for cross-regulation resolution.
///
/// A regulation chain deeper than this is treated as a circular reference.
/// Dutch regulations typically chain 3-5 levels (wet -> ministeriele
/// regeling -> gemeentelijke verordening).
pub const MAX_CROSS_REGULATION_DEPTH: usize = 20;

/// Maximum recursion depth for dot-notation property access.
pub const MAX_PROPERTY_DEPTH: usize = 32;
