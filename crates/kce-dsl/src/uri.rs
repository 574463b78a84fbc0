//! URI and CURIE resolution for definition documents.

use std::collections::BTreeMap;

use oxigraph::model::NamedNode;

use crate::error::DslError;
use crate::DslResult;

const BUILTIN_PREFIXES: &[(&str, &str)] = &[
    ("kce", kce_knowledge::vocab::KCE_NS),
    ("prov", kce_knowledge::vocab::PROV_NS),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

/// Resolves document-local CURIEs against built-in and declared prefixes.
pub(crate) struct UriResolver {
    prefixes: BTreeMap<String, String>,
}

impl UriResolver {
    pub(crate) fn new(document_prefixes: &BTreeMap<String, String>) -> Self {
        let mut prefixes: BTreeMap<String, String> = BUILTIN_PREFIXES
            .iter()
            .map(|(p, ns)| (p.to_string(), ns.to_string()))
            .collect();
        for (prefix, ns) in document_prefixes {
            prefixes.insert(prefix.clone(), ns.clone());
        }
        Self { prefixes }
    }

    /// Resolve an absolute IRI or CURIE to a `NamedNode`.
    pub(crate) fn resolve(&self, reference: &str) -> DslResult<NamedNode> {
        let reference = reference.trim();
        if is_absolute_iri(reference) {
            return NamedNode::new(reference).map_err(|e| DslError::InvalidUri(e.to_string()));
        }
        if let Some((prefix, local)) = reference.split_once(':') {
            if let Some(ns) = self.prefixes.get(prefix) {
                return NamedNode::new(format!("{ns}{local}"))
                    .map_err(|e| DslError::InvalidUri(e.to_string()));
            }
            return Err(DslError::InvalidUri(format!(
                "unknown prefix '{prefix}' in '{reference}'"
            )));
        }
        Err(DslError::InvalidUri(format!(
            "'{reference}' is neither an absolute IRI nor a known CURIE"
        )))
    }

    /// SPARQL prologue declaring every prefix this resolver knows.
    pub(crate) fn prologue(&self) -> String {
        let mut out = String::new();
        for (prefix, ns) in &self.prefixes {
            out.push_str(&format!("PREFIX {prefix}: <{ns}>\n"));
        }
        out
    }
}

pub(crate) fn is_absolute_iri(value: &str) -> bool {
    value.starts_with("http://")
        || value.starts_with("https://")
        || value.starts_with("urn:")
        || value.starts_with("file:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_absolute_curie_and_rejects_bare_names() {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("ex".to_string(), "http://example.com/ns#".to_string());
        let resolver = UriResolver::new(&prefixes);

        assert_eq!(
            resolver.resolve("ex:Panel").unwrap().as_str(),
            "http://example.com/ns#Panel"
        );
        assert_eq!(
            resolver.resolve("http://example.com/x").unwrap().as_str(),
            "http://example.com/x"
        );
        assert_eq!(
            resolver.resolve("xsd:integer").unwrap().as_str(),
            "http://www.w3.org/2001/XMLSchema#integer"
        );
        assert!(resolver.resolve("Panel").is_err());
        assert!(resolver.resolve("nope:Panel").is_err());
    }
}
