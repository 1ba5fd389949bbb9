//! Property tests: alpha and structural equivalence are equivalence
//! relations whose hashes survive variable renaming.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use proptest::prelude::*;

use akh_reasoner::equivalence::Equivalence;
use akh_reasoner::{ConceptId, Pattern, ReasonerQuery, Rel, Schema};

const ROLES: [&str; 2] = ["role1", "role2"];
const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn schema() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let mut s = Schema::new();
            for role in ROLES {
                s.define_role(role, None).unwrap();
            }
            s.define_relation("connection", None).unwrap();
            s.define_entity("node", None).unwrap();
            for role in ROLES {
                s.relates("connection", role).unwrap();
                s.plays("node", role).unwrap();
            }
            Arc::new(s)
        })
        .clone()
}

/// A relation query up to the names of its variables.
#[derive(Debug, Clone)]
struct Shape {
    /// (role index, variable index)
    players: Vec<(usize, usize)>,
    /// (variable index, raw id)
    pins: Vec<(usize, u64)>,
}

impl Shape {
    fn pinned(&self) -> BTreeMap<usize, u64> {
        let used: BTreeSet<usize> = self.players.iter().map(|(_, var)| *var).collect();
        self.pins
            .iter()
            .filter(|(var, _)| used.contains(var))
            .copied()
            .collect()
    }

    fn build(&self, names: &[&str], id_offset: u64) -> ReasonerQuery {
        let rel = self
            .players
            .iter()
            .fold(Rel::new().isa("connection"), |rel, (role, var)| {
                rel.player(ROLES[*role], names[*var])
            });
        let pattern = self
            .pinned()
            .into_iter()
            .fold(Pattern::new().relation(rel), |p, (var, raw)| {
                p.id(names[var], ConceptId::new(raw + id_offset).unwrap())
            });
        ReasonerQuery::new(&pattern, &schema()).unwrap()
    }
}

fn shape() -> impl Strategy<Value = Shape> {
    (
        prop::collection::vec((0..ROLES.len(), 0..NAMES.len()), 1..4),
        prop::collection::vec((0..NAMES.len(), 1..50u64), 0..3),
    )
        .prop_map(|(players, pins)| Shape { players, pins })
}

fn renaming() -> impl Strategy<Value = Vec<&'static str>> {
    Just(vec!["p", "q", "r", "s"]).prop_shuffle()
}

proptest! {
    #[test]
    fn alpha_equivalence_survives_renaming(shape in shape(), names in renaming()) {
        let original = shape.build(&NAMES, 0);
        let renamed = shape.build(&names, 0);

        prop_assert!(original.is_alpha_equivalent(&original));
        prop_assert!(original.is_alpha_equivalent(&renamed));
        prop_assert!(renamed.is_alpha_equivalent(&original));
        prop_assert_eq!(original.alpha_equivalence_hash(), renamed.alpha_equivalence_hash());
    }

    #[test]
    fn alpha_equivalence_is_transitive(
        shape in shape(),
        first in renaming(),
        second in renaming(),
    ) {
        let a = shape.build(&NAMES, 0);
        let b = shape.build(&first, 0);
        let c = shape.build(&second, 0);

        prop_assert!(a.is_alpha_equivalent(&b) && b.is_alpha_equivalent(&c));
        prop_assert!(a.is_alpha_equivalent(&c));
    }

    #[test]
    fn structural_equivalence_ignores_which_ids(shape in shape(), names in renaming()) {
        let original = shape.build(&NAMES, 0);
        let repinned = shape.build(&names, 100);

        prop_assert!(original.is_structurally_equivalent(&repinned));
        prop_assert!(repinned.is_structurally_equivalent(&original));
        prop_assert_eq!(
            original.structural_equivalence_hash(),
            repinned.structural_equivalence_hash()
        );
        prop_assert_eq!(
            original.is_alpha_equivalent(&repinned),
            shape.pinned().is_empty()
        );
    }

    #[test]
    fn alpha_equivalence_implies_structural(shape in shape(), names in renaming()) {
        let a = shape.build(&NAMES, 0);
        let b = shape.build(&names, 0);
        prop_assert!(!a.is_alpha_equivalent(&b) || a.is_structurally_equivalent(&b));
        prop_assert_eq!(
            Equivalence::Structural.hash(&a),
            Equivalence::Structural.hash(&b)
        );
    }
}
