//! Durability tests for the disk-backed store.

use kce_knowledge::{KnowledgeStore, StoreConfig};
use oxigraph::model::{Literal, NamedNode, Triple};

fn node(iri: &str) -> NamedNode {
    NamedNode::new(iri).unwrap()
}

#[test]
fn disk_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::Disk(dir.path().join("kb"));

    {
        let store = KnowledgeStore::open(&config).unwrap();
        store
            .add_triples(
                [Triple::new(
                    node("http://example.com/ns#ctx"),
                    node("http://example.com/ns#answer"),
                    Literal::from(42),
                )],
                None,
            )
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    let reopened = KnowledgeStore::open(&config).unwrap();
    assert_eq!(reopened.len().unwrap(), 1);
    assert!(reopened
        .ask("ASK { <http://example.com/ns#ctx> <http://example.com/ns#answer> 42 }")
        .unwrap());
}

#[test]
fn dump_turtle_emits_default_graph() {
    let store = KnowledgeStore::in_memory().unwrap();
    store
        .update("INSERT DATA { <http://example.com/ns#a> <http://example.com/ns#p> \"hello\" }")
        .unwrap();
    let mut out = Vec::new();
    store.dump_turtle(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("http://example.com/ns#a"));
    assert!(text.contains("hello"));
}
