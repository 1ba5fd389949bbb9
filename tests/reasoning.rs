//! End-to-end reasoning over the geography fixture: recursive rules,
//! explanations, materialization and loading from disk.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use akh_reasoner::error::{ConfigError, FixtureError, QueryError, RuleError};
use akh_reasoner::schema::Label;
use akh_reasoner::storage::Handles;
use akh_reasoner::{
    Answer, ConceptId, MemoryStorage, Pattern, ReasonerConfig, ReasonerError, ReasoningSession,
    Rel, RuleDefinition, Schema, Storage, Value, Variable,
};

const CHAIN: [&str; 4] = ["paris", "france", "europe", "world"];

fn locates(x: &str, y: &str) -> Rel {
    Rel::new()
        .isa("locates")
        .player("located", x)
        .player("location", y)
}

fn var(name: &str) -> Variable {
    Variable::new(name)
}

fn position(handles: &Handles, id: ConceptId) -> usize {
    CHAIN
        .iter()
        .position(|name| handles[*name] == id)
        .unwrap()
}

fn ids(answers: &[Answer], name: &str) -> BTreeSet<ConceptId> {
    answers.iter().map(|a| a.get(&var(name)).unwrap()).collect()
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[test]
fn location_is_transitive() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();

    assert!(session.requires_reiteration(&query));
    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(answers.len(), 6);
}

#[test]
fn residence_follows_location() {
    let (store, handles) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(
            &Pattern::new()
                .relation(
                    Rel::new()
                        .isa("lives-in")
                        .player("resident", "p")
                        .player("residence", "c"),
                )
                .id("p", handles["alice"]),
        )
        .unwrap();

    let answers = session.resolve_all(&query).unwrap();
    let expected: BTreeSet<ConceptId> = CHAIN.iter().map(|name| handles[*name]).collect();
    assert_eq!(ids(&answers, "c"), expected);
}

#[test]
fn attribute_heads_share_one_derived_value() {
    let (store, handles) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().has("x", "region", "r"))
        .unwrap();

    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(
        ids(&answers, "x"),
        BTreeSet::from([handles["paris"], handles["france"]])
    );
    assert_eq!(ids(&answers, "r").len(), 1);
}

#[test]
fn value_constraints_filter_derived_attributes() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);

    let european = session
        .query(&Pattern::new().has_value("x", "region", "european"))
        .unwrap();
    assert_eq!(session.resolve_all(&european).unwrap().len(), 2);

    let nordic = session
        .query(&Pattern::new().has_value("x", "region", "nordic"))
        .unwrap();
    assert!(session.resolve_all(&nordic).unwrap().is_empty());
}

#[test]
fn completed_queries_are_cached_up_to_renaming() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();
    session.resolve_all(&query).unwrap();

    let renamed = session
        .atomic_query(&Pattern::new().relation(locates("p", "q")))
        .unwrap();
    assert!(session.answer_cache().is_complete(&renamed));
}

// ---------------------------------------------------------------------------
// Explanations
// ---------------------------------------------------------------------------

#[test]
fn derivations_count_one_rule_per_extra_hop() {
    let (store, handles) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();

    for answer in session.resolve_all(&query).unwrap() {
        let from = position(&handles, answer.get(&var("a")).unwrap());
        let to = position(&handles, answer.get(&var("b")).unwrap());
        let hops = to - from;

        assert_eq!(answer.deductions(), hops - 1, "{answer}");
        assert_eq!(answer.explicit_path().len(), hops, "{answer}");

        let explanation = answer.explanation().unwrap();
        if hops == 1 {
            assert!(explanation.is_lookup());
        } else {
            assert!(explanation.is_rule());
            assert_eq!(
                explanation.rule_label(),
                Some(&Label::from("transitive-location"))
            );
        }
    }
}

#[test]
fn conjunctions_are_explained_by_connected_joins() {
    let (store, handles) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(
            &Pattern::new()
                .relation(locates("x", "y"))
                .has_value("y", "name", "Europe"),
        )
        .unwrap();

    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(answers.len(), 2);
    for answer in &answers {
        let explanation = answer.explanation().unwrap();
        assert!(explanation.is_join());
        assert!(explanation.is_connected());
        assert_eq!(explanation.answers().len(), 2);

        let expected = if answer.get(&var("x")) == Some(handles["paris"]) {
            1
        } else {
            0
        };
        assert_eq!(answer.deductions(), expected, "{answer}");
    }
}

#[test]
fn explanations_export_as_json() {
    let (store, handles) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(
            &Pattern::new()
                .relation(locates("a", "b"))
                .id("a", handles["paris"])
                .id("b", handles["world"]),
        )
        .unwrap();

    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(answers.len(), 1);
    let json = answers[0].explanation().unwrap().to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["kind"], "rule");
    assert_eq!(parsed["rule"], "transitive-location");
    assert_eq!(parsed["answers"].as_array().unwrap().len(), 2);
}

#[test]
fn explanations_can_be_switched_off() {
    let (store, _) = common::load_fixture("geography.toml");
    let config = ReasonerConfig::default().with_explanations(false);
    let session = ReasoningSession::with_config(&store, config);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();

    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(answers.len(), 6);
    assert!(answers.iter().all(|a| a.explanation().is_none()));
}

#[test]
fn uncached_sessions_find_the_same_answers() {
    let (store, _) = common::load_fixture("geography.toml");
    let config = ReasonerConfig::default().with_cache(false);
    let session = ReasoningSession::with_config(&store, config);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();

    assert_eq!(session.resolve_all(&query).unwrap().len(), 6);
    assert_eq!(session.resolve_all(&query).unwrap().len(), 6);
}

// ---------------------------------------------------------------------------
// Planning and reiteration
// ---------------------------------------------------------------------------

#[test]
fn plans_keep_conjunctions_connected() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(
            &Pattern::new()
                .isa("x", "place")
                .isa("z", "place")
                .relation(locates("x", "y"))
                .relation(locates("y", "z")),
        )
        .unwrap();

    let plan = session.plan(&query).unwrap();
    assert_eq!(plan.len(), 4);
    assert!(plan.is_connected());
}

#[test]
fn reiteration_follows_recursion_and_disconnected_derivations() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let people = session.query(&Pattern::new().isa("x", "person")).unwrap();
    assert!(!session.requires_reiteration(&people));

    let mut schema = Schema::new();
    schema.define_attribute("name", None).unwrap();
    schema.define_entity("person", None).unwrap();
    schema.define_entity("employee", Some("person")).unwrap();
    schema.owns("person", "name").unwrap();
    let mut store = MemoryStorage::new(Arc::new(schema));
    store
        .add_rule(&RuleDefinition::new(
            "named-people-are-employed",
            Pattern::new().has("x", "name", "n"),
            Pattern::new().isa("x", "employee"),
        ))
        .unwrap();

    let session = ReasoningSession::new(&store);
    let one = session.query(&Pattern::new().isa("a", "employee")).unwrap();
    assert!(!session.requires_reiteration(&one));
    let two = session
        .query(&Pattern::new().isa("a", "employee").isa("b", "employee"))
        .unwrap();
    assert!(session.requires_reiteration(&two));
}

#[test]
fn type_heads_derive_membership() {
    let mut schema = Schema::new();
    schema.define_attribute("name", None).unwrap();
    schema.define_entity("person", None).unwrap();
    schema.define_entity("employee", Some("person")).unwrap();
    schema.owns("person", "name").unwrap();
    let mut store = MemoryStorage::new(Arc::new(schema));
    let ann = store.insert_entity("person").unwrap();
    let bob = store.insert_entity("person").unwrap();
    let name = store.insert_attribute("name", "Ann").unwrap();
    store.insert_ownership(ann, name).unwrap();
    store
        .add_rule(&RuleDefinition::new(
            "named-people-are-employed",
            Pattern::new().has("x", "name", "n"),
            Pattern::new().isa("x", "employee"),
        ))
        .unwrap();

    let session = ReasoningSession::new(&store);
    let query = session.query(&Pattern::new().isa("x", "employee")).unwrap();
    let answers = session.resolve_all(&query).unwrap();
    assert_eq!(ids(&answers, "x"), BTreeSet::from([ann]));
    assert!(!ids(&answers, "x").contains(&bob));
}

// ---------------------------------------------------------------------------
// Materialization
// ---------------------------------------------------------------------------

#[test]
fn materialized_facts_are_served_as_lookups() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().has_value("x", "region", "european"))
        .unwrap();

    let written = session.materialize(&query).unwrap();
    assert!(written > 0);
    assert_eq!(session.materialize(&query).unwrap(), 0);

    let region = store
        .find_attribute(&Label::from("region"), &Value::from("european"))
        .unwrap();
    assert!(store.concept(region).unwrap().inferred);

    let fresh = ReasoningSession::new(&store);
    let answers = fresh.resolve_all(&query).unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers.iter().all(|a| a.deductions() == 0));
    assert_eq!(fresh.materialize(&query).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Loading and errors
// ---------------------------------------------------------------------------

#[test]
fn knowledge_base_and_config_load_from_disk() {
    common::init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    let kb = dir.path().join("kb.toml");
    std::fs::copy(common::fixture_path("geography.toml"), &kb).unwrap();
    let config_path = dir.path().join("reasoner.toml");
    std::fs::write(&config_path, "max_passes = 16\nreuse_plans = false\n").unwrap();

    let (store, handles) = MemoryStorage::load(&kb).unwrap();
    assert!(handles.contains_key("alice-in-paris"));
    assert_eq!(store.rules().len(), 3);

    let config = ReasonerConfig::load(&config_path).unwrap();
    assert_eq!(config.max_passes, 16);
    assert!(!config.reuse_plans);

    let session = ReasoningSession::with_config(&store, config);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();
    assert_eq!(session.resolve_all(&query).unwrap().len(), 6);
}

#[test]
fn missing_files_are_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    assert!(matches!(
        MemoryStorage::load(&missing),
        Err(ReasonerError::Fixture(FixtureError::Read { .. }))
    ));
    assert!(matches!(
        ReasonerConfig::load(&missing),
        Err(ConfigError::Read { .. })
    ));
}

#[test]
fn invalid_queries_and_rules_are_rejected() {
    let (store, _) = common::load_fixture("geography.toml");
    let session = ReasoningSession::new(&store);

    assert!(matches!(
        session.query(&Pattern::new().isa("x", "country")),
        Err(ReasonerError::Query(QueryError::UnknownType { .. }))
    ));
    assert!(matches!(
        session.atomic_query(&Pattern::new().isa("x", "place").isa("y", "place")),
        Err(ReasonerError::Query(QueryError::NotAtomic { count: 2 }))
    ));

    let unbound = RuleDefinition::new(
        "dangling",
        Pattern::new().relation(locates("x", "y")),
        Pattern::new().relation(locates("x", "w")),
    );
    assert!(matches!(
        unbound.compile(session.schema()),
        Err(RuleError::UnboundHeadVariable { .. })
    ));
}
