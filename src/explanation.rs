//! Explanations: why an answer holds.
//!
//! Every answer produced by resolution carries one explanation. Lookups are
//! leaves; rule and join explanations point at the answers they were built
//! from, so the explanations of a derived answer form a DAG whose leaves are
//! stored facts.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::answer::Answer;
use crate::query::ReasonerQuery;
use crate::schema::Label;
use crate::storage::InferredFact;

/// Provenance of one answer.
#[derive(Debug, Clone)]
pub enum Explanation {
    /// Found directly in storage.
    Lookup { query: Arc<ReasonerQuery> },
    /// Derived by applying `rule` while resolving `query`; `answers` are the
    /// rule body answers that fired it. `concluded` holds the facts the head
    /// asserts that storage does not hold.
    Rule {
        rule: Label,
        query: Arc<ReasonerQuery>,
        answers: Vec<Answer>,
        concluded: Vec<InferredFact>,
    },
    /// Joined from the answers of the atomic queries of a conjunction.
    Join { answers: Vec<Answer> },
}

impl Explanation {
    pub fn lookup(query: Arc<ReasonerQuery>) -> Self {
        Explanation::Lookup { query }
    }

    pub fn rule(rule: Label, query: Arc<ReasonerQuery>, answers: Vec<Answer>) -> Self {
        Explanation::Rule {
            rule,
            query,
            answers,
            concluded: Vec::new(),
        }
    }

    pub fn concluding(mut self, facts: Vec<InferredFact>) -> Self {
        if let Explanation::Rule { concluded, .. } = &mut self {
            *concluded = facts;
        }
        self
    }

    pub fn join(answers: Vec<Answer>) -> Self {
        Explanation::Join { answers }
    }

    /// The parent answers; empty for lookups.
    pub fn answers(&self) -> &[Answer] {
        match self {
            Explanation::Lookup { .. } => &[],
            Explanation::Rule { answers, .. } | Explanation::Join { answers } => answers,
        }
    }

    pub fn query(&self) -> Option<&ReasonerQuery> {
        match self {
            Explanation::Lookup { query } | Explanation::Rule { query, .. } => Some(query),
            Explanation::Join { .. } => None,
        }
    }

    /// Facts a rule application asserted beyond storage; empty otherwise.
    pub fn concluded(&self) -> &[InferredFact] {
        match self {
            Explanation::Rule { concluded, .. } => concluded,
            _ => &[],
        }
    }

    pub fn rule_label(&self) -> Option<&Label> {
        match self {
            Explanation::Rule { rule, .. } => Some(rule),
            _ => None,
        }
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Explanation::Lookup { .. })
    }

    pub fn is_rule(&self) -> bool {
        matches!(self, Explanation::Rule { .. })
    }

    pub fn is_join(&self) -> bool {
        matches!(self, Explanation::Join { .. })
    }

    /// Whether the parent answers form one component when linked through
    /// shared variables. Lookups are trivially connected.
    pub fn is_connected(&self) -> bool {
        let answers = self.answers();
        if answers.len() <= 1 {
            return !matches!(self, Explanation::Join { answers } if answers.is_empty());
        }
        let mut reached = vec![false; answers.len()];
        reached[0] = true;
        let mut frontier = vec![0usize];
        while let Some(i) = frontier.pop() {
            for j in 0..answers.len() {
                if !reached[j] && answers[i].vars().any(|v| answers[j].contains(v)) {
                    reached[j] = true;
                    frontier.push(j);
                }
            }
        }
        reached.into_iter().all(|r| r)
    }

    /// Serializable snapshot of the explanation tree.
    pub fn to_record(&self) -> ExplanationRecord {
        ExplanationRecord {
            kind: match self {
                Explanation::Lookup { .. } => "lookup",
                Explanation::Rule { .. } => "rule",
                Explanation::Join { .. } => "join",
            },
            rule: self.rule_label().map(|l| l.to_string()),
            query: self.query().map(|q| q.to_string()),
            answers: self.answers().iter().map(AnswerRecord::from).collect(),
        }
    }

    /// The explanation tree as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_record())
    }
}

// ---------------------------------------------------------------------------
// Export records
// ---------------------------------------------------------------------------

/// Serializable form of an [`Explanation`].
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationRecord {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<AnswerRecord>,
}

/// Serializable form of an [`Answer`] with its explanation.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    pub bindings: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Box<ExplanationRecord>>,
}

impl From<&Answer> for AnswerRecord {
    fn from(answer: &Answer) -> Self {
        AnswerRecord {
            bindings: answer
                .iter()
                .map(|(v, id)| (v.name().to_string(), id.get()))
                .collect(),
            explanation: answer.explanation().map(|e| Box::new(e.to_record())),
        }
    }
}
