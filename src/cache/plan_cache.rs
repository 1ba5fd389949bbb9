//! Resolution plans reused across structurally equivalent queries.

use std::collections::HashMap;

use crate::equivalence::{Equivalence, Equivalent};
use crate::error::QueryResult;
use crate::plan::ResolutionPlan;
use crate::query::ReasonerQuery;

/// Plans keyed by structural equivalence.
///
/// Queries that differ only in variable names or in which concepts their ids
/// pin share an atom order. The stored order refers to the atoms of the
/// first query planned; later queries translate it through a renaming.
#[derive(Debug, Default)]
pub struct PlanCache {
    orders: HashMap<Equivalent<ReasonerQuery>, Vec<usize>>,
    hits: usize,
    misses: usize,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The plan for `query`, computed at most once per structural class.
    pub fn plan(&mut self, query: &ReasonerQuery) -> QueryResult<ResolutionPlan> {
        let key = Equivalent::structural(query.clone());
        if let Some((canonical, order)) = self.orders.get_key_value(&key) {
            if let Some(order) = translate(canonical.get(), order, query) {
                self.hits += 1;
                return ResolutionPlan::from_order(query, &order);
            }
        }
        self.misses += 1;
        let order = ResolutionPlan::order(query);
        let plan = ResolutionPlan::from_order(query, &order)?;
        self.orders.entry(key).or_insert(order);
        Ok(plan)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }
}

/// Map an order over `canonical`'s selectable atoms onto `query`'s.
fn translate(canonical: &ReasonerQuery, order: &[usize], query: &ReasonerQuery) -> Option<Vec<usize>> {
    let renaming = Equivalence::Structural
        .renamings(canonical, query)
        .into_iter()
        .next()?;
    let from = canonical.selectable_atoms();
    let to = query.selectable_atoms();
    order
        .iter()
        .map(|&i| {
            let renamed = from.get(i)?.map_vars(&|v| renaming.rename(v));
            to.iter().position(|a| **a == renamed)
        })
        .collect()
}
