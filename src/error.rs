//! Rich diagnostic error types for the reasoner.
//!
//! Each area defines its own error type with miette `#[diagnostic]` derives,
//! giving every failure an error code and help text. Only problems detectable
//! from the static structure of a query, rule or fixture are errors: a query
//! that mentions data which does not exist simply resolves to no answers.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the reasoner.
///
/// Each variant wraps an area-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum ReasonerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Concept(#[from] ConceptError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fixture(#[from] FixtureError),
}

// ---------------------------------------------------------------------------
// Concept errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConceptError {
    #[error("concept allocator exhausted: cannot allocate more than u64::MAX concepts")]
    #[diagnostic(
        code(akh::reasoner::concept::exhausted),
        help(
            "The concept id space is exhausted. This requires 2^64 allocations; \
             check for a derivation loop that keeps minting inferred concepts."
        )
    )]
    AllocatorExhausted,
}

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("schema label \"{label}\" is already defined")]
    #[diagnostic(
        code(akh::reasoner::schema::duplicate_label),
        help("Type and role labels share one namespace. Pick a different label.")
    )]
    DuplicateLabel { label: String },

    #[error("supertype \"{sup}\" of \"{label}\" is not defined")]
    #[diagnostic(
        code(akh::reasoner::schema::unknown_supertype),
        help("Define the supertype before its subtypes.")
    )]
    UnknownSupertype { label: String, sup: String },

    #[error("\"{label}\" is a {actual}, expected a {expected}")]
    #[diagnostic(
        code(akh::reasoner::schema::kind_mismatch),
        help(
            "Entities, relations, attributes and roles form separate hierarchies. \
             A type can only specialise a type of the same kind."
        )
    )]
    KindMismatch {
        label: String,
        expected: String,
        actual: String,
    },

    #[error("schema label \"{label}\" is not defined")]
    #[diagnostic(
        code(akh::reasoner::schema::unknown_label),
        help("Define the type or role in the schema before referencing it.")
    )]
    UnknownLabel { label: String },
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

// ---------------------------------------------------------------------------
// Query construction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("unknown type label \"{label}\"")]
    #[diagnostic(
        code(akh::reasoner::query::unknown_type),
        help("The label does not name any type in the schema. Check its spelling.")
    )]
    UnknownType { label: String },

    #[error("\"{label}\" is not a role")]
    #[diagnostic(
        code(akh::reasoner::query::not_a_role),
        help("Role players must be annotated with role labels, not type labels.")
    )]
    NotARole { label: String },

    #[error("\"{label}\" is not a relation type")]
    #[diagnostic(
        code(akh::reasoner::query::not_a_relation),
        help("Only relation types can carry role players.")
    )]
    NotARelationType { label: String },

    #[error("\"{label}\" is not an attribute type")]
    #[diagnostic(
        code(akh::reasoner::query::not_an_attribute),
        help("Ownership patterns (`has`) must name an attribute type.")
    )]
    NotAnAttributeType { label: String },

    #[error("role \"{role}\" is not related by relation type \"{relation}\"")]
    #[diagnostic(
        code(akh::reasoner::query::role_not_related),
        help(
            "A relation can only use roles its type (or one of its supertypes) relates. \
             Add a `relates` declaration or use a different role."
        )
    )]
    RoleNotRelated { role: String, relation: String },

    #[error("pattern is not atomic: found {count} selectable atoms, expected exactly 1")]
    #[diagnostic(
        code(akh::reasoner::query::not_atomic),
        help(
            "Atomic queries hold a single relation, attribute or type atom plus \
             predicates. Use a conjunctive query for larger patterns."
        )
    )]
    NotAtomic { count: usize },

    #[error("pattern is empty")]
    #[diagnostic(
        code(akh::reasoner::query::empty),
        help("A query needs at least one atom.")
    )]
    Empty,

    #[error("malformed pattern: {message}")]
    #[diagnostic(
        code(akh::reasoner::query::malformed),
        help("Check the statement reported above against the pattern builder's documentation.")
    )]
    Malformed { message: String },
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("rule \"{rule}\" has an invalid {part}")]
    #[diagnostic(
        code(akh::reasoner::rule::invalid_pattern),
        help("Fix the pattern reported below; rule patterns follow the same rules as queries.")
    )]
    InvalidPattern {
        rule: String,
        part: &'static str,
        #[source]
        #[diagnostic_source]
        source: QueryError,
    },

    #[error("rule \"{rule}\" concludes a {kind} atom, which cannot be derived")]
    #[diagnostic(
        code(akh::reasoner::rule::invalid_head),
        help(
            "Rule heads must be a single relation, attribute ownership or type \
             membership with a concrete type label."
        )
    )]
    InvalidHead { rule: String, kind: String },

    #[error("rule \"{rule}\" uses head variable ${var} that the body never binds")]
    #[diagnostic(
        code(akh::reasoner::rule::unbound_head_variable),
        help(
            "Every role player and owner in the head must appear in the body. \
             Only the derived relation or attribute itself may be new."
        )
    )]
    UnboundHeadVariable { rule: String, var: String },

    #[error("rule \"{rule}\" leaves the role of ${var} unspecified in its head")]
    #[diagnostic(
        code(akh::reasoner::rule::ambiguous_head_role),
        help("Annotate every role player in a rule head with a concrete role.")
    )]
    AmbiguousHeadRole { rule: String, var: String },

    #[error("rule \"{label}\" is defined twice")]
    #[diagnostic(
        code(akh::reasoner::rule::duplicate),
        help("Rule labels must be unique within a knowledge base.")
    )]
    Duplicate { label: String },
}

pub type RuleResult<T> = std::result::Result<T, RuleError>;

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("concept {id} not found")]
    #[diagnostic(
        code(akh::reasoner::storage::unknown_concept),
        help("The id does not refer to any stored or session-local concept.")
    )]
    UnknownConcept { id: u64 },

    #[error("cannot store a {kind} instance of \"{label}\"")]
    #[diagnostic(
        code(akh::reasoner::storage::invalid_instance),
        help("Instances can only be created for non-abstract entity, relation or attribute types.")
    )]
    InvalidInstance { label: String, kind: String },

    #[error("{message}")]
    #[diagnostic(
        code(akh::reasoner::storage::backend),
        help("The storage backend reported a failure. See the message for details.")
    )]
    Backend { message: String },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read reasoner config: {path}")]
    #[diagnostic(
        code(akh::reasoner::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reasoner config: {message}")]
    #[diagnostic(
        code(akh::reasoner::config::parse),
        help("Check the TOML syntax and the option names in the reasoner config.")
    )]
    Parse { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Knowledge-base fixture errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FixtureError {
    #[error("failed to read knowledge base: {path}")]
    #[diagnostic(
        code(akh::reasoner::fixture::read),
        help("Ensure the knowledge-base file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse knowledge base: {message}")]
    #[diagnostic(
        code(akh::reasoner::fixture::parse),
        help("Check the TOML syntax against the knowledge-base layout.")
    )]
    Parse { message: String },

    #[error("instance \"{name}\" is referenced but never declared")]
    #[diagnostic(
        code(akh::reasoner::fixture::unknown_instance),
        help("Declare the instance in `[[instances]]` or `[[attributes]]` before using it.")
    )]
    UnknownInstance { name: String },

    #[error("instance \"{name}\" is declared twice")]
    #[diagnostic(
        code(akh::reasoner::fixture::duplicate_instance),
        help("Instance names are the fixture's handles and must be unique.")
    )]
    DuplicateInstance { name: String },
}

pub type FixtureResult<T> = std::result::Result<T, FixtureError>;

/// Convenience result type for the reasoner.
pub type ReasonerResult<T> = std::result::Result<T, ReasonerError>;
