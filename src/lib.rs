// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-reasoner
//!
//! Rule-based reasoning over conjunctive pattern queries.
//!
//! A query is split into atomic queries; each is answered by direct lookup
//! in a [`Storage`](storage::Storage) and by applying the inference rules
//! whose heads unify with it. Partial answers are joined in planner order and
//! every answer carries an explanation of how it was derived.
//!
//! ## Architecture
//!
//! - **Atoms** (`atom`): isa, relation, attribute, sub, plays, relates and
//!   predicate atoms, with role inference
//! - **Equivalence** (`equivalence`): alpha and structural equivalence with
//!   consistent hashes
//! - **Unification** (`unifier`): exact, rule, structural and subsumptive
//!   unifiers between atoms and queries
//! - **Caches** (`cache`): eager and lazy answer caches keyed by alpha
//!   equivalence, rule and plan caches
//! - **Planning** (`plan`): connected, priority-ordered resolution plans
//! - **Rules** (`rule`): validated rules and their dependency graph
//! - **Reasoning** (`reasoner`): sessions, fixpoint resolution and
//!   materialization
//! - **Storage** (`storage`): the storage interface and an in-memory store
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use akh_reasoner::query::{Pattern, Rel};
//! use akh_reasoner::reasoner::ReasoningSession;
//! use akh_reasoner::rule::RuleDefinition;
//! use akh_reasoner::schema::Schema;
//! use akh_reasoner::storage::MemoryStorage;
//!
//! let mut schema = Schema::new();
//! schema.define_entity("place", None).unwrap();
//! schema.define_role("located", None).unwrap();
//! schema.define_role("location", None).unwrap();
//! schema.define_relation("locates", None).unwrap();
//! schema.relates("locates", "located").unwrap();
//! schema.relates("locates", "location").unwrap();
//! schema.plays("place", "located").unwrap();
//! schema.plays("place", "location").unwrap();
//!
//! let mut store = MemoryStorage::new(Arc::new(schema));
//! let paris = store.insert_entity("place").unwrap();
//! let france = store.insert_entity("place").unwrap();
//! store.insert_relation("locates", &[("located", paris), ("location", france)]).unwrap();
//!
//! let locates = |x: &str, y: &str| Rel::new().isa("locates").player("located", x).player("location", y);
//! store.add_rule(&RuleDefinition::new(
//!     "transitive-location",
//!     Pattern::new().relation(locates("x", "y")).relation(locates("y", "z")),
//!     Pattern::new().relation(locates("x", "z")),
//! )).unwrap();
//!
//! let session = ReasoningSession::new(&store);
//! let query = session.query(&Pattern::new().relation(locates("a", "b"))).unwrap();
//! for answer in session.resolve(&query) {
//!     let answer = answer.unwrap();
//!     println!("{answer} ({} deductions)", answer.deductions());
//! }
//! ```

pub mod answer;
pub mod atom;
pub mod cache;
pub mod concept;
pub mod config;
pub mod equivalence;
pub mod error;
pub mod explanation;
pub mod plan;
pub mod query;
pub mod reasoner;
pub mod rule;
pub mod schema;
pub mod storage;
pub mod unifier;
pub mod var;

pub use answer::Answer;
pub use concept::{ConceptId, Value};
pub use config::ReasonerConfig;
pub use error::{ReasonerError, ReasonerResult};
pub use explanation::Explanation;
pub use query::{Pattern, ReasonerAtomicQuery, ReasonerQuery, Rel};
pub use reasoner::{AnswerStream, ReasoningSession};
pub use rule::{InferenceRule, RuleDefinition};
pub use schema::Schema;
pub use storage::{MemoryStorage, Storage};
pub use unifier::{MultiUnifier, Unifier, UnifierType};
pub use var::Variable;
