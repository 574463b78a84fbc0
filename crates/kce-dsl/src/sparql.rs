//! SPARQL template helpers shared by the loader and the rule engine.

/// Replace `?var` occurrences outside string literals. The callback returns
/// the replacement text for a variable name, or `None` to keep it verbatim.
pub fn substitute_variables(template: &str, replace: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' | '$' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        out.push(c);
                    } else {
                        match replace(&name) {
                            Some(replacement) => out.push_str(&replacement),
                            None => {
                                out.push(c);
                                out.push_str(&name);
                            }
                        }
                    }
                }
                _ => out.push(c),
            },
        }
    }
    out
}

/// Bind `?ctx` to a concrete IRI in a precondition or goal query.
pub fn bind_context(query: &str, context_iri: &str) -> String {
    substitute_variables(query, |name| {
        (name == "ctx").then(|| format!("<{context_iri}>"))
    })
}

/// Ensure a precondition string is an ASK query, wrapping bare patterns.
pub fn ensure_ask(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.to_ascii_uppercase().starts_with("ASK")
        || trimmed.to_ascii_uppercase().starts_with("PREFIX")
        || trimmed.to_ascii_uppercase().starts_with("BASE")
    {
        trimmed.to_string()
    } else {
        format!("ASK {{ {trimmed} }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_outside_literals_only() {
        let template = r#"INSERT DATA { ?c <urn:p> "keep ?c here" }"#;
        let result = substitute_variables(template, |name| {
            (name == "c").then(|| "<urn:ctx>".to_string())
        });
        assert_eq!(result, r#"INSERT DATA { <urn:ctx> <urn:p> "keep ?c here" }"#);
    }

    #[test]
    fn unknown_variables_stay_verbatim() {
        let result = substitute_variables("ASK { ?ctx <urn:p> ?v }", |name| {
            (name == "ctx").then(|| "<urn:c1>".to_string())
        });
        assert_eq!(result, "ASK { <urn:c1> <urn:p> ?v }");
    }

    #[test]
    fn ensure_ask_wraps_bare_patterns() {
        assert_eq!(
            ensure_ask("?ctx <urn:p> 1 ."),
            "ASK { ?ctx <urn:p> 1 . }"
        );
        assert_eq!(ensure_ask("ASK { ?s ?p ?o }"), "ASK { ?s ?p ?o }");
    }
}
