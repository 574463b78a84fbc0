//! Target descriptions.
//!
//! The goal of a run: either a ready-made SPARQL ASK query or a graph
//! pattern whose variables are existentially quantified when compiled to an
//! ASK.

use std::collections::BTreeMap;

use oxigraph::sparql::Query;
use serde::Deserialize;

use crate::error::DslError;
use crate::uri::UriResolver;
use crate::DslResult;

/// The goal a run must make true
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescription {
    /// A full SPARQL ASK query
    #[serde(default, rename = "askQuery")]
    pub ask_query: Option<String>,
    /// A ground-or-variable triple pattern
    #[serde(default)]
    pub pattern: Option<Vec<TriplePattern>>,
    /// Optional CURIE prefixes for the pattern form
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
}

/// One pattern triple; each position is a `?var`, an IRI/CURIE, or (object
/// only) a plain literal
#[derive(Debug, Clone, Deserialize)]
pub struct TriplePattern {
    /// Subject position
    pub subject: String,
    /// Predicate position
    pub predicate: String,
    /// Object position
    pub object: String,
}

impl TargetDescription {
    /// Parse from JSON text
    pub fn from_json_str(text: &str) -> DslResult<Self> {
        let target: Self = serde_json::from_str(text)?;
        target.validate()?;
        Ok(target)
    }

    /// Parse from YAML text
    pub fn from_yaml_str(text: &str) -> DslResult<Self> {
        let target: Self = serde_yaml::from_str(text)?;
        target.validate()?;
        Ok(target)
    }

    /// Wrap an existing ASK query
    pub fn from_ask(ask_query: impl Into<String>) -> Self {
        Self {
            ask_query: Some(ask_query.into()),
            pattern: None,
            prefixes: BTreeMap::new(),
        }
    }

    fn validate(&self) -> DslResult<()> {
        match (&self.ask_query, &self.pattern) {
            (Some(_), Some(_)) | (None, None) => Err(DslError::Definition(
                "target must carry exactly one of askQuery or pattern".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Compile to a SPARQL ASK query, validating the result parses.
    pub fn to_ask(&self) -> DslResult<String> {
        let ask = if let Some(query) = &self.ask_query {
            query.trim().to_string()
        } else {
            let pattern = self.pattern.as_ref().expect("validated");
            let resolver = UriResolver::new(&self.prefixes);
            let mut body = String::new();
            for triple in pattern {
                body.push_str(&format!(
                    "  {} {} {} .\n",
                    pattern_term(&triple.subject, &resolver, false)?,
                    pattern_term(&triple.predicate, &resolver, false)?,
                    pattern_term(&triple.object, &resolver, true)?,
                ));
            }
            format!("ASK {{\n{body}}}")
        };
        Query::parse(&ask, None).map_err(|e| DslError::Sparql {
            context: "target description".to_string(),
            message: e.to_string(),
        })?;
        Ok(ask)
    }
}

fn pattern_term(
    value: &str,
    resolver: &UriResolver,
    object_position: bool,
) -> DslResult<String> {
    let value = value.trim();
    if let Some(name) = value.strip_prefix('?') {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DslError::Definition(format!(
                "invalid variable name '{value}' in target pattern"
            )));
        }
        return Ok(value.to_string());
    }
    match resolver.resolve(value) {
        Ok(node) => Ok(format!("<{}>", node.as_str())),
        Err(e) => {
            if object_position {
                // Plain literal in object position; numbers and booleans pass
                // through bare so they keep their natural datatype.
                if value.parse::<i64>().is_ok()
                    || value.parse::<f64>().is_ok()
                    || value == "true"
                    || value == "false"
                {
                    Ok(value.to_string())
                } else {
                    Ok(format!("\"{}\"", value.replace('"', "\\\"")))
                }
            } else {
                Err(e)
            }
        }
    }
}
