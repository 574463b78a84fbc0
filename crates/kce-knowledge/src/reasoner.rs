//! Forward-closure reasoner.
//!
//! Runs an RDFS-plus rule set (subclass/subproperty hierarchies, domain and
//! range typing, inverse, symmetric and transitive properties) to fixpoint
//! over the whole dataset. Inferred triples land in the default graph. The
//! closure is idempotent: re-running it on a saturated graph inserts nothing.

use std::collections::HashSet;

use oxigraph::model::{NamedNode, NamedNodeRef, Quad, Subject, Term};
use oxigraph::store::Store;
use tracing::debug;

use crate::error::KnowledgeError;
use crate::vocab;
use crate::KnowledgeResult;

fn quads_with_predicate(store: &Store, predicate: NamedNodeRef<'_>) -> KnowledgeResult<Vec<Quad>> {
    store
        .quads_for_pattern(None, Some(predicate), None, None)
        .collect::<Result<_, _>>()
        .map_err(|e| KnowledgeError::Store(e.to_string()))
}

fn named_pairs(store: &Store, predicate: NamedNodeRef<'_>) -> KnowledgeResult<Vec<(NamedNode, NamedNode)>> {
    let mut pairs = Vec::new();
    for quad in quads_with_predicate(store, predicate)? {
        if let (Subject::NamedNode(s), Term::NamedNode(o)) = (quad.subject, quad.object) {
            pairs.push((s, o));
        }
    }
    Ok(pairs)
}

fn typed_properties(store: &Store, class: NamedNodeRef<'_>) -> KnowledgeResult<HashSet<NamedNode>> {
    let mut props = HashSet::new();
    for quad in store
        .quads_for_pattern(None, Some(vocab::RDF_TYPE), Some(class.into()), None)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| KnowledgeError::Store(e.to_string()))?
    {
        if let Subject::NamedNode(p) = quad.subject {
            props.insert(p);
        }
    }
    Ok(props)
}

fn holds(store: &Store, subject: &Subject, predicate: &NamedNode, object: &Term) -> KnowledgeResult<bool> {
    Ok(store
        .quads_for_pattern(
            Some(subject.as_ref()),
            Some(predicate.as_ref()),
            Some(object.as_ref()),
            None,
        )
        .next()
        .transpose()
        .map_err(|e| KnowledgeError::Store(e.to_string()))?
        .is_some())
}

fn term_as_subject(term: &Term) -> Option<Subject> {
    match term {
        Term::NamedNode(n) => Some(Subject::NamedNode(n.clone())),
        Term::BlankNode(b) => Some(Subject::BlankNode(b.clone())),
        _ => None,
    }
}

fn subject_as_term(subject: &Subject) -> Term {
    match subject {
        Subject::NamedNode(n) => Term::NamedNode(n.clone()),
        Subject::BlankNode(b) => Term::BlankNode(b.clone()),
        #[allow(unreachable_patterns)]
        _ => unreachable!("unsupported subject kind"),
    }
}

/// One inference pass; returns candidate triples (may contain known facts).
fn infer_once(store: &Store) -> KnowledgeResult<Vec<(Subject, NamedNode, Term)>> {
    let mut out = Vec::new();

    let sub_class = named_pairs(store, vocab::RDFS_SUB_CLASS_OF)?;
    let sub_prop = named_pairs(store, vocab::RDFS_SUB_PROPERTY_OF)?;
    let domains = named_pairs(store, vocab::RDFS_DOMAIN)?;
    let ranges = named_pairs(store, vocab::RDFS_RANGE)?;
    let inverses = named_pairs(store, vocab::OWL_INVERSE_OF)?;
    let symmetric = typed_properties(store, vocab::OWL_SYMMETRIC_PROPERTY)?;
    let transitive = typed_properties(store, vocab::OWL_TRANSITIVE_PROPERTY)?;

    // subClassOf transitivity
    for (a, b) in &sub_class {
        for (b2, c) in &sub_class {
            if b == b2 && a != c {
                out.push((
                    Subject::NamedNode(a.clone()),
                    vocab::RDFS_SUB_CLASS_OF.into_owned(),
                    Term::NamedNode(c.clone()),
                ));
            }
        }
    }

    // type propagation along subClassOf
    for (a, b) in &sub_class {
        for quad in store
            .quads_for_pattern(
                None,
                Some(vocab::RDF_TYPE),
                Some(a.as_ref().into()),
                None,
            )
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KnowledgeError::Store(e.to_string()))?
        {
            out.push((
                quad.subject,
                vocab::RDF_TYPE.into_owned(),
                Term::NamedNode(b.clone()),
            ));
        }
    }

    // subPropertyOf transitivity and propagation
    for (p, q) in &sub_prop {
        for (p2, r) in &sub_prop {
            if q == p2 && p != r {
                out.push((
                    Subject::NamedNode(p.clone()),
                    vocab::RDFS_SUB_PROPERTY_OF.into_owned(),
                    Term::NamedNode(r.clone()),
                ));
            }
        }
        for quad in quads_with_predicate(store, p.as_ref())? {
            out.push((quad.subject, q.clone(), quad.object));
        }
    }

    // domain and range typing
    for (p, class) in &domains {
        for quad in quads_with_predicate(store, p.as_ref())? {
            out.push((
                quad.subject,
                vocab::RDF_TYPE.into_owned(),
                Term::NamedNode(class.clone()),
            ));
        }
    }
    for (p, class) in &ranges {
        for quad in quads_with_predicate(store, p.as_ref())? {
            if let Some(subject) = term_as_subject(&quad.object) {
                out.push((
                    subject,
                    vocab::RDF_TYPE.into_owned(),
                    Term::NamedNode(class.clone()),
                ));
            }
        }
    }

    // inverseOf, both directions
    for (p, q) in &inverses {
        for (prop, other) in [(p, q), (q, p)] {
            for quad in quads_with_predicate(store, prop.as_ref())? {
                if let Some(subject) = term_as_subject(&quad.object) {
                    out.push((subject, other.clone(), subject_as_term(&quad.subject)));
                }
            }
        }
    }

    // symmetric properties
    for p in &symmetric {
        for quad in quads_with_predicate(store, p.as_ref())? {
            if let Some(subject) = term_as_subject(&quad.object) {
                out.push((subject, p.clone(), subject_as_term(&quad.subject)));
            }
        }
    }

    // transitive properties, one join step per pass
    for p in &transitive {
        let quads = quads_with_predicate(store, p.as_ref())?;
        for left in &quads {
            let Some(mid) = term_as_subject(&left.object) else {
                continue;
            };
            for right in &quads {
                if right.subject == mid && subject_as_term(&left.subject) != right.object {
                    out.push((left.subject.clone(), p.clone(), right.object.clone()));
                }
            }
        }
    }

    Ok(out)
}

/// Run the closure to fixpoint; returns the number of triples inferred.
pub(crate) fn forward_closure(store: &Store) -> KnowledgeResult<usize> {
    let mut total = 0usize;
    loop {
        let mut fresh = 0usize;
        for (subject, predicate, object) in infer_once(store)? {
            if holds(store, &subject, &predicate, &object)? {
                continue;
            }
            let quad = Quad::new(
                subject,
                predicate,
                object,
                oxigraph::model::GraphName::DefaultGraph,
            );
            if store
                .insert(&quad)
                .map_err(|e| KnowledgeError::Store(e.to_string()))?
            {
                fresh += 1;
            }
        }
        total += fresh;
        if fresh == 0 {
            break;
        }
    }
    if total > 0 {
        debug!(inferred = total, "forward closure complete");
    }
    Ok(total)
}
