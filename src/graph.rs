//! The AFF4 object graph, flattened from `information.turtle`.
//!
//! Every subject becomes an object identified by its URI. Its predicates
//! become attribute names and their objects attribute values, both with the
//! schema namespace removed (`aff4:chunkSize` -> `chunkSize`,
//! `aff4:ImageStream` -> `ImageStream`). Attributes are multi-valued and keep
//! the order in which the statements appear.

use std::collections::HashMap;
use std::io::BufRead;

use log::debug;
use rio_api::model::{Literal, Subject, Term, Triple};
use rio_api::parser::TriplesParser;
use rio_turtle::{TurtleError, TurtleParser};

use crate::error::Result;

/// Attribute name to ordered values.
pub type Attributes = HashMap<String, Vec<String>>;

#[derive(Clone, Debug, Default)]
pub struct MetadataGraph {
    objects: HashMap<String, Attributes>,
}

/// Drops everything up to the first `#`, which is how the AFF4 vocabulary is namespaced.
fn strip_namespace(s: &str) -> &str {
    match s.split_once('#') {
        Some((_, local)) => local,
        None => s,
    }
}

fn subject_key(subject: &Subject<'_>) -> String {
    match subject {
        Subject::NamedNode(n) => n.iri.to_string(),
        Subject::BlankNode(b) => format!("_:{}", b.id),
        other => other.to_string(),
    }
}

fn term_value(term: &Term<'_>) -> String {
    match term {
        Term::NamedNode(n) => strip_namespace(n.iri).to_string(),
        Term::BlankNode(b) => format!("_:{}", b.id),
        Term::Literal(Literal::Simple { value })
        | Term::Literal(Literal::LanguageTaggedString { value, .. })
        | Term::Literal(Literal::Typed { value, .. }) => value.to_string(),
        other => other.to_string(),
    }
}

impl MetadataGraph {
    /// Parses a Turtle document into a graph.
    pub fn from_turtle<R: BufRead>(reader: R) -> Result<Self> {
        let mut graph = Self::default();
        let mut parser = TurtleParser::new(reader, None);
        let mut count = 0usize;
        parser.parse_all(&mut |t: Triple<'_>| -> std::result::Result<(), TurtleError> {
            graph.add(
                subject_key(&t.subject),
                strip_namespace(t.predicate.iri),
                term_value(&t.object),
            );
            count += 1;
            Ok(())
        })?;
        debug!(
            "Parsed {} statements about {} objects",
            count,
            graph.objects.len()
        );
        Ok(graph)
    }

    /// Appends `value` to the `attribute` of `uri`, creating the object if needed.
    pub fn add(&mut self, uri: impl Into<String>, attribute: &str, value: impl Into<String>) {
        self.objects
            .entry(uri.into())
            .or_default()
            .entry(attribute.to_string())
            .or_default()
            .push(value.into());
    }

    pub fn attributes_of(&self, uri: &str) -> Option<&Attributes> {
        self.objects.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.objects.contains_key(uri)
    }

    /// All values of `attribute` on `uri`; empty when either is unknown.
    pub fn values(&self, uri: &str, attribute: &str) -> &[String] {
        self.objects
            .get(uri)
            .and_then(|attrs| attrs.get(attribute))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, uri: &str, attribute: &str) -> Option<&str> {
        self.values(uri, attribute).first().map(String::as_str)
    }

    pub fn has_value(&self, uri: &str, attribute: &str, value: &str) -> bool {
        self.values(uri, attribute).iter().any(|v| v == value)
    }

    /// Numeric attribute, `None` when missing or not a number.
    pub fn first_u64(&self, uri: &str, attribute: &str) -> Option<u64> {
        self.first(uri, attribute)?.trim().parse().ok()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
