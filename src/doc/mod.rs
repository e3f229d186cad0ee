//! Metadata document model.
//!
//! Every `.yaml` document in an image group is an *ordered* mapping whose
//! entries interleave sentinel keys (`StartClass`, `EndClass`) with typed
//! attributes, and the same key (notably `StartClass`) appears many times at
//! the top level. Ordinary YAML loaders collapse duplicate keys, so this
//! module drives the `yaml-rust2` event parser directly and materialises the
//! document as a flat entry list that preserves both order and duplicates.
//!
//! Values are restricted to what the format actually writes: scalars
//! (interpreted per the declared record field type), sequences of scalars
//! (usually prefixed by a count element), and one level of nested mapping
//! under each `StartClass` sentinel.

mod decode;
mod records;

pub use decode::{
    decode_record, double_array, find_next_class, float_array, get_integer, get_string, int_array,
    long_array, string_array, DecodeStep, Record,
};
pub use records::*;

use std::fs;
use std::path::Path;

use tracing::trace;
use yaml_rust2::parser::{Event, EventReceiver, Parser};

use crate::error::DocError;

// =============================================================================
// Value model
// =============================================================================

/// A value attached to a document key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A scalar, kept as its source text until a record field types it
    Scalar(String),
    /// An ordered sequence of scalars
    Sequence(Vec<String>),
    /// A nested ordered mapping (the body of a `StartClass` entry)
    Mapping(Vec<(String, Value)>),
}

impl Value {
    /// The scalar text, if this value is a scalar.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The sequence elements, if this value is a sequence.
    pub fn as_sequence(&self) -> Option<&[String]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// The nested entries, if this value is a mapping.
    pub fn as_mapping(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Mapping(entries) => Some(entries),
            _ => None,
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// A parsed metadata document: the root mapping as an ordered entry list.
#[derive(Debug, Clone, Default)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    /// Parse a document from its source text.
    pub fn parse(text: &str) -> Result<Self, DocError> {
        let mut builder = TreeBuilder::default();
        let mut parser = Parser::new(text.chars());
        parser.load(&mut builder, false)?;

        match builder.root {
            Some(Node::Mapping(entries)) => Ok(Document {
                entries: entries
                    .into_iter()
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            }),
            Some(_) => Err(DocError::NotAMapping),
            None => Ok(Document::default()),
        }
    }

    /// Read and parse a document from disk.
    pub fn open(path: &Path) -> Result<Self, DocError> {
        trace!(path = %path.display(), "loading document");
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// The root entries in document order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Number of root entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Event-driven tree builder
// =============================================================================

/// Intermediate node built from parser events.
#[derive(Debug)]
enum Node {
    Scalar(String),
    Sequence(Vec<Node>),
    Mapping(Vec<(String, Node)>),
}

impl Node {
    /// Collapse into the restricted [`Value`] shape.
    ///
    /// Sequence elements that are not scalars do not occur in well-formed
    /// documents; they are dropped with a trace so a damaged file degrades to
    /// a short vector instead of failing the whole document.
    fn into_value(self) -> Value {
        match self {
            Node::Scalar(s) => Value::Scalar(s),
            Node::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Node::Scalar(s) => Some(s),
                        other => {
                            trace!(?other, "dropping non-scalar sequence element");
                            None
                        }
                    })
                    .collect(),
            ),
            Node::Mapping(entries) => Value::Mapping(
                entries
                    .into_iter()
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            ),
        }
    }
}

enum Frame {
    Sequence(Vec<Node>),
    Mapping {
        entries: Vec<(String, Node)>,
        pending_key: Option<String>,
    },
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Frame>,
    root: Option<Node>,
}

impl TreeBuilder {
    fn insert(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(Frame::Sequence(items)) => items.push(node),
            Some(Frame::Mapping {
                entries,
                pending_key,
            }) => match pending_key.take() {
                Some(key) => entries.push((key, node)),
                None => {
                    // A container in key position; the format never writes
                    // this, so fold it under an empty key.
                    let key = match node {
                        Node::Scalar(s) => s,
                        _ => String::new(),
                    };
                    *pending_key = Some(key);
                }
            },
            None => {
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
        }
    }
}

impl EventReceiver for TreeBuilder {
    fn on_event(&mut self, event: Event) {
        match event {
            Event::Scalar(value, ..) => self.insert(Node::Scalar(value)),
            Event::SequenceStart(..) => self.stack.push(Frame::Sequence(Vec::new())),
            Event::SequenceEnd => {
                if let Some(Frame::Sequence(items)) = self.stack.pop() {
                    self.insert(Node::Sequence(items));
                }
            }
            Event::MappingStart(..) => self.stack.push(Frame::Mapping {
                entries: Vec::new(),
                pending_key: None,
            }),
            Event::MappingEnd => {
                if let Some(Frame::Mapping { entries, .. }) = self.stack.pop() {
                    self.insert(Node::Mapping(entries));
                }
            }
            Event::Alias(..) => self.insert(Node::Scalar(String::new())),
            _ => {}
        }
    }
}

// =============================================================================
// String un-escaping
// =============================================================================

/// Substitutions applied, in order, to stored string fields.
const ESCAPES: &[(&str, &str)] = &[
    ("_#9;", "\t"),
    ("_#10;", "\n"),
    ("_#13;", "\r"),
    ("_#34;", "\""),
    ("_#58;", ":"),
    ("_#92;", "\\"),
    ("_#91;", "["),
    ("_#93;", "]"),
    ("_#124;", "|"),
    ("_#60;", "<"),
    ("_#62;", ">"),
    ("_#32;", " "),
    ("__empty", ""),
];

/// Restore the characters the acquisition software escapes in string fields.
pub fn unescape(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in ESCAPES {
        if out.contains(pattern) {
            out = out.replace(pattern, replacement);
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_duplicate_keys() {
        let doc = Document::parse(
            "StartClass:\n  ClassName: CFoo\n  mA: 1\nStartClass:\n  ClassName: CBar\nEndClass: 0\n",
        )
        .unwrap();

        assert_eq!(doc.len(), 3);
        assert_eq!(doc.entries()[0].0, "StartClass");
        assert_eq!(doc.entries()[1].0, "StartClass");
        assert_eq!(doc.entries()[2].0, "EndClass");
    }

    #[test]
    fn test_parse_nested_mapping_order() {
        let doc =
            Document::parse("StartClass:\n  ClassName: CFoo\n  mB: 2\n  mA: 1\n").unwrap();
        let mapping = doc.entries()[0].1.as_mapping().unwrap();
        let keys: Vec<&str> = mapping.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["ClassName", "mB", "mA"]);
    }

    #[test]
    fn test_parse_sequence_of_scalars() {
        let doc = Document::parse("theElapsedTimes: [3, 0, 100, 200]\n").unwrap();
        let seq = doc.entries()[0].1.as_sequence().unwrap();
        assert_eq!(seq, ["3", "0", "100", "200"]);
    }

    #[test]
    fn test_parse_block_sequence() {
        let doc = Document::parse("theValues:\n- 2\n- 10\n- 20\n").unwrap();
        let seq = doc.entries()[0].1.as_sequence().unwrap();
        assert_eq!(seq, ["2", "10", "20"]);
    }

    #[test]
    fn test_parse_empty_document() {
        let doc = Document::parse("").unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_parse_scalar_root_rejected() {
        assert!(matches!(
            Document::parse("just a scalar"),
            Err(DocError::NotAMapping)
        ));
    }

    #[test]
    fn test_unescape_substitutions() {
        assert_eq!(unescape("a_#58;b"), "a:b");
        assert_eq!(unescape("_#91;x_#93;"), "[x]");
        assert_eq!(unescape("tab_#9;end"), "tab\tend");
        assert_eq!(unescape("path_#92;file"), "path\\file");
        assert_eq!(unescape("lt_#60;gt_#62;"), "lt<gt>");
        assert_eq!(unescape("__empty"), "");
        assert_eq!(unescape("a_#32;b"), "a b");
    }

    #[test]
    fn test_unescape_is_identity_without_triggers() {
        let plain = "DAPI 405nm channel";
        assert_eq!(unescape(plain), plain);
        // Idempotent on already-unescaped output.
        assert_eq!(unescape(&unescape(plain)), plain);
    }
}
