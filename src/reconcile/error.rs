//! Reconciliation errors and diagnostics.

use thiserror::Error;

/// Fatal errors for a single `apply` invocation.
///
/// Resolution errors are memoised by the resolver, hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// More than one field matches a key case-insensitively.
    #[error("ambiguous field for key `{key}` on {owner}: `{first}` and `{second}` both match")]
    AmbiguousField {
        owner: &'static str,
        key: String,
        first: &'static str,
        second: &'static str,
    },

    /// More than one pre/post hook or constructor of the same kind matches.
    #[error("ambiguous {kind} for `{key}` on {owner}: more than one candidate")]
    AmbiguousMethod {
        owner: &'static str,
        key: String,
        kind: &'static str,
    },

    /// Field and hook disagree on the value type.
    #[error("type conflict for `{key}` on {owner}: {expected} vs {found}")]
    TypeConflict {
        owner: &'static str,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Both a converter and an allocator exist for one element type.
    #[error("both converter and allocator registered on {owner} for {element}")]
    ConflictingConstructors {
        owner: &'static str,
        element: &'static str,
    },

    /// An allocator or converter does not know the requested variant.
    #[error("unmapped {element} variant `{variant}`")]
    UnmappedVariant {
        element: &'static str,
        variant: String,
    },

    /// A structured value for an allocator-built element has no discriminator.
    #[error("missing `{discriminator}` discriminator for {element}")]
    MissingDiscriminator {
        element: &'static str,
        discriminator: String,
    },

    /// Default construction is impossible for the target type.
    #[error("cannot instantiate {element}: {reason}")]
    InstantiationFailure {
        element: &'static str,
        reason: String,
    },

    /// The document value has a shape the binding cannot hold.
    #[error("`{key}` expects {expected}, got {found}")]
    ShapeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Serde could not convert a pass-through value.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    /// A constructor asked for a capability the caller did not provide.
    #[error("capability {0} is not available in this apply context")]
    MissingCapability(&'static str),

    /// `apply` was handed a non-object document.
    #[error("top-level document must be an object, got {0}")]
    NotAnObject(&'static str),

    /// A shared instance's lock was poisoned by a panicking writer.
    #[error("lock poisoned while configuring {0}")]
    Poisoned(&'static str),
}

/// Non-fatal findings collected during an `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A document key with no binding on the target type.
    UnknownKey { owner: &'static str, path: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::UnknownKey { owner, path } => {
                write!(f, "configuration key is ignored: {} (no binding on {})", path, owner)
            }
        }
    }
}
