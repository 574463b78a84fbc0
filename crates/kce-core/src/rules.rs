//! Rule engine.
//!
//! Evaluates the rule catalogue against the current graph. Rules are tried
//! in priority order (higher first, URI order on ties); each antecedent
//! binding set fires the consequent at most once per run, enforced by a
//! fired-bindings cache even when a consequent is not idempotent. Consequent
//! failures are reported and skipped unless the rule is marked critical.

use std::collections::HashSet;
use std::sync::Arc;

use oxigraph::model::{NamedNode, Term};
use tracing::{debug, warn};

use kce_dsl::sparql::substitute_variables;
use kce_knowledge::vocab;
use kce_knowledge::{KnowledgeStore, SolutionRow};

use crate::error::CoreError;
use crate::provenance::{Event, EventKind, ProvenanceRecorder, RunContext};
use crate::CoreResult;

/// A rule as stored in the catalogue
#[derive(Debug, Clone)]
struct RuleDefinition {
    uri: NamedNode,
    antecedent: String,
    consequent: String,
    critical: bool,
}

/// Per-run fired-bindings cache. Keys are `(rule, canonical bindings)`.
#[derive(Debug, Default)]
pub struct FiredBindings {
    seen: HashSet<(String, String)>,
}

impl FiredBindings {
    fn contains(&self, rule: &NamedNode, fingerprint: &str) -> bool {
        self.seen
            .contains(&(rule.as_str().to_string(), fingerprint.to_string()))
    }

    fn insert(&mut self, rule: &NamedNode, fingerprint: String) {
        self.seen.insert((rule.as_str().to_string(), fingerprint));
    }

    /// Number of cached firings
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has fired yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Evaluates rules and applies their consequents as graph updates
pub struct RuleEngine {
    store: Arc<KnowledgeStore>,
    recorder: Arc<ProvenanceRecorder>,
}

impl RuleEngine {
    /// Create a rule engine over the given store and recorder
    pub fn new(store: Arc<KnowledgeStore>, recorder: Arc<ProvenanceRecorder>) -> Self {
        Self { store, recorder }
    }

    /// Apply every eligible rule once. Returns the number of firings.
    pub async fn apply(
        &self,
        ctx: &mut RunContext,
        cache: &mut FiredBindings,
    ) -> CoreResult<usize> {
        self.apply_inner(ctx, cache, None).await
    }

    /// Apply one specific rule (a `Rule` plan step)
    pub async fn apply_one(
        &self,
        ctx: &mut RunContext,
        cache: &mut FiredBindings,
        rule: &NamedNode,
    ) -> CoreResult<usize> {
        let fired = self.apply_inner(ctx, cache, Some(rule)).await?;
        Ok(fired)
    }

    async fn apply_inner(
        &self,
        ctx: &mut RunContext,
        cache: &mut FiredBindings,
        only: Option<&NamedNode>,
    ) -> CoreResult<usize> {
        let mut fired = 0usize;
        for rule in self.load_rules()? {
            if let Some(only) = only {
                if &rule.uri != only {
                    continue;
                }
            }
            fired += self.apply_rule(ctx, cache, &rule).await?;
        }
        Ok(fired)
    }

    /// Rules ordered by priority desc, URI asc for determinism.
    fn load_rules(&self) -> CoreResult<Vec<RuleDefinition>> {
        let query = format!(
            "{}SELECT ?rule ?antecedent ?consequent ?priority ?critical WHERE {{\n\
             ?rule a kce:Rule ;\n\
                   kce:hasAntecedent ?antecedent ;\n\
                   kce:hasConsequent ?consequent .\n\
             OPTIONAL {{ ?rule kce:priority ?p }}\n\
             OPTIONAL {{ ?rule kce:isCritical ?critical }}\n\
             BIND(COALESCE(?p, 0) AS ?priority)\n\
             }} ORDER BY DESC(?priority) ASC(?rule)",
            vocab::SPARQL_PROLOGUE
        );
        let rows = self.store.query(&query)?.into_rows();
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let uri = match row.get("rule") {
                Some(Term::NamedNode(uri)) => uri.clone(),
                _ => continue,
            };
            let antecedent = literal_value(&row, "antecedent");
            let consequent = literal_value(&row, "consequent");
            let critical = matches!(
                row.get("critical"),
                Some(Term::Literal(l)) if l.value() == "true"
            );
            rules.push(RuleDefinition {
                uri,
                antecedent,
                consequent,
                critical,
            });
        }
        Ok(rules)
    }

    async fn apply_rule(
        &self,
        ctx: &mut RunContext,
        cache: &mut FiredBindings,
        rule: &RuleDefinition,
    ) -> CoreResult<usize> {
        let binding_sets = self.match_antecedent(rule)?;
        let mut fired = 0usize;
        for bindings in binding_sets {
            let fingerprint = fingerprint(&bindings);
            if cache.contains(&rule.uri, &fingerprint) {
                continue;
            }
            let update = substitute_variables(&rule.consequent, |name| {
                bindings.get(name).map(|term| term.to_string())
            });
            match self.store.update(&update) {
                Ok(()) => {
                    cache.insert(&rule.uri, fingerprint.clone());
                    fired += 1;
                    self.recorder
                        .emit(
                            ctx,
                            Event::new(EventKind::RuleFired)
                                .operation(&rule.uri)
                                .inputs(serde_json::json!({ "bindings": fingerprint })),
                        )
                        .await?;
                    debug!(rule = rule.uri.as_str(), "rule fired");
                }
                Err(e) => {
                    warn!(
                        rule = rule.uri.as_str(),
                        error = %e,
                        "rule consequent failed"
                    );
                    if rule.critical {
                        return Err(CoreError::Rule {
                            rule: rule.uri.as_str().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(fired)
    }

    /// Evaluate the antecedent: an ASK yields at most one empty binding set,
    /// a SELECT yields one binding set per solution.
    fn match_antecedent(&self, rule: &RuleDefinition) -> CoreResult<Vec<SolutionRow>> {
        if is_ask_form(&rule.antecedent) {
            if self.store.ask(&rule.antecedent)? {
                Ok(vec![SolutionRow::new()])
            } else {
                Ok(Vec::new())
            }
        } else {
            Ok(self.store.query(&rule.antecedent)?.into_rows())
        }
    }
}

fn literal_value(row: &SolutionRow, var: &str) -> String {
    match row.get(var) {
        Some(Term::Literal(l)) => l.value().to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Canonical fingerprint of a binding set: sorted `var=term` pairs.
fn fingerprint(bindings: &SolutionRow) -> String {
    let mut pairs: Vec<String> = bindings
        .iter()
        .map(|(var, term)| format!("{var}={term}"))
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Whether the first body keyword after the prologue is ASK.
fn is_ask_form(query: &str) -> bool {
    for line in query.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("PREFIX") || upper.starts_with("BASE") {
            continue;
        }
        return upper.starts_with("ASK");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_form_detection_skips_prologue() {
        assert!(is_ask_form("PREFIX ex: <urn:e>\nASK { ?s ?p ?o }"));
        assert!(!is_ask_form("PREFIX ex: <urn:e>\nSELECT * WHERE { ?s ?p ?o }"));
        assert!(is_ask_form("  ask { ?s ?p ?o }"));
    }

    #[test]
    fn fingerprints_are_order_independent() {
        use oxigraph::model::Literal;
        let mut a = SolutionRow::new();
        a.insert("x".to_string(), Literal::from(1).into());
        a.insert("y".to_string(), Literal::from(2).into());
        let mut b = SolutionRow::new();
        b.insert("y".to_string(), Literal::from(2).into());
        b.insert("x".to_string(), Literal::from(1).into());
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
