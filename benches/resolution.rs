//! Benchmarks for unification and rule resolution.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use akh_reasoner::{
    MemoryStorage, Pattern, ReasonerAtomicQuery, ReasoningSession, Rel, RuleDefinition, Schema,
    UnifierType,
};

fn schema() -> Arc<Schema> {
    let mut s = Schema::new();
    s.define_entity("place", None).unwrap();
    for role in ["located", "location"] {
        s.define_role(role, None).unwrap();
    }
    s.define_relation("locates", None).unwrap();
    for role in ["located", "location"] {
        s.relates("locates", role).unwrap();
        s.plays("place", role).unwrap();
    }
    Arc::new(s)
}

fn locates(x: &str, y: &str) -> Rel {
    Rel::new()
        .isa("locates")
        .player("located", x)
        .player("location", y)
}

/// `places` places, each located in one randomly chosen later place.
fn forest(places: usize, seed: u64) -> MemoryStorage {
    let mut store = MemoryStorage::new(schema());
    let ids: Vec<_> = (0..places)
        .map(|_| store.insert_entity("place").unwrap())
        .collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    for i in 0..places - 1 {
        let j = rng.gen_range(i + 1..places);
        store
            .insert_relation("locates", &[("located", ids[i]), ("location", ids[j])])
            .unwrap();
    }
    store
        .add_rule(&RuleDefinition::new(
            "transitive-location",
            Pattern::new()
                .relation(locates("x", "y"))
                .relation(locates("y", "z")),
            Pattern::new().relation(locates("x", "z")),
        ))
        .unwrap();
    store
}

fn bench_rule_unification(c: &mut Criterion) {
    let s = schema();
    let head = ReasonerAtomicQuery::new(&Pattern::new().relation(locates("x", "z")), &s).unwrap();
    let query = ReasonerAtomicQuery::new(&Pattern::new().relation(locates("a", "b")), &s).unwrap();

    c.bench_function("unify_rule_head", |bench| {
        bench.iter(|| black_box(head.multi_unifier(&query, UnifierType::Rule)))
    });
}

fn bench_transitive_closure(c: &mut Criterion) {
    let store = forest(10, 0);

    c.bench_function("transitive_closure_10", |bench| {
        bench.iter(|| {
            let session = ReasoningSession::new(&store);
            let query = session
                .query(&Pattern::new().relation(locates("a", "b")))
                .unwrap();
            black_box(session.resolve_all(&query).unwrap())
        })
    });
}

fn bench_cached_resolution(c: &mut Criterion) {
    let store = forest(10, 0);
    let session = ReasoningSession::new(&store);
    let query = session
        .query(&Pattern::new().relation(locates("a", "b")))
        .unwrap();
    session.resolve_all(&query).unwrap();

    c.bench_function("cached_closure_10", |bench| {
        bench.iter(|| black_box(session.resolve_all(&query).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_rule_unification,
    bench_transitive_closure,
    bench_cached_resolution,
);
criterion_main!(benches);
