//! Call-tree model: recorded operations, the open-node stack and the text
//! renderer.
//!
//! A [`CallTree`] is an arena of nodes plus a stack of currently open node
//! indices. The root is index 0 and is never popped, so `push` always has a
//! parent. [`CallTree::root`] materializes an owned [`CallTreeNode`]
//! snapshot that can be rendered or serialized without touching the arena.

use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a tree within one instrumentation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreeId(pub u32);

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// Closed set of intercepted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Get,
    Set,
    Has,
    DeleteProperty,
    OwnKeys,
    GetOwnPropertyDescriptor,
    DefineProperty,
    GetPrototypeOf,
    SetPrototypeOf,
    IsExtensible,
    PreventExtensions,
    Apply,
    Construct,
    /// Conversion requested through the `@@toPrimitive` function a handle
    /// hands out.
    ToPrimitive,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Has => "has",
            Self::DeleteProperty => "deleteProperty",
            Self::OwnKeys => "ownKeys",
            Self::GetOwnPropertyDescriptor => "getOwnPropertyDescriptor",
            Self::DefineProperty => "defineProperty",
            Self::GetPrototypeOf => "getPrototypeOf",
            Self::SetPrototypeOf => "setPrototypeOf",
            Self::IsExtensible => "isExtensible",
            Self::PreventExtensions => "preventExtensions",
            Self::Apply => "apply",
            Self::Construct => "construct",
            Self::ToPrimitive => "toPrimitive",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Detail payloads
// ---------------------------------------------------------------------------

/// One value inside a structured detail payload, captured at record time.
///
/// JSON form: scalars are strings, records are objects in field order,
/// lists are arrays and functions are `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailValue {
    /// Primitive (or depth-capped object) in display form.
    Scalar(String),
    /// Nested record of an object's own fields.
    Record(Vec<(String, DetailValue)>),
    /// Argument list; renders with index keys.
    List(Vec<DetailValue>),
    /// A callable, rendered as a placeholder.
    Function,
}

impl DetailValue {
    pub fn scalar(text: impl Into<String>) -> Self {
        Self::Scalar(text.into())
    }
}

/// Payload attached to an operation node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detail {
    /// A single key or hint, rendered as `detail: <text>`.
    Scalar(String),
    /// Keyed fields, rendered one per line.
    Fields(Vec<(String, DetailValue)>),
}

fn serialize_fields<S: Serializer>(
    fields: &[(String, DetailValue)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (key, value) in fields {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

fn collect_fields<'de, A: MapAccess<'de>>(
    mut map: A,
) -> Result<Vec<(String, DetailValue)>, A::Error> {
    let mut fields = Vec::new();
    while let Some(entry) = map.next_entry::<String, DetailValue>()? {
        fields.push(entry);
    }
    Ok(fields)
}

impl Serialize for DetailValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(text) => serializer.serialize_str(text),
            Self::Record(fields) => serialize_fields(fields, serializer),
            Self::List(items) => serializer.collect_seq(items),
            Self::Function => serializer.serialize_unit(),
        }
    }
}

struct DetailValueVisitor;

impl<'de> Visitor<'de> for DetailValueVisitor {
    type Value = DetailValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, object, array or null")
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<DetailValue, E> {
        Ok(DetailValue::Scalar(text.to_string()))
    }

    fn visit_string<E: de::Error>(self, text: String) -> Result<DetailValue, E> {
        Ok(DetailValue::Scalar(text))
    }

    fn visit_unit<E: de::Error>(self) -> Result<DetailValue, E> {
        Ok(DetailValue::Function)
    }

    fn visit_none<E: de::Error>(self) -> Result<DetailValue, E> {
        Ok(DetailValue::Function)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<DetailValue, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(DetailValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<DetailValue, A::Error> {
        collect_fields(map).map(DetailValue::Record)
    }
}

impl<'de> Deserialize<'de> for DetailValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DetailValueVisitor)
    }
}

impl Serialize for Detail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(text) => serializer.serialize_str(text),
            Self::Fields(fields) => serialize_fields(fields, serializer),
        }
    }
}

struct DetailVisitor;

impl<'de> Visitor<'de> for DetailVisitor {
    type Value = Detail;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or an object")
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<Detail, E> {
        Ok(Detail::Scalar(text.to_string()))
    }

    fn visit_string<E: de::Error>(self, text: String) -> Result<Detail, E> {
        Ok(Detail::Scalar(text))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Detail, A::Error> {
        collect_fields(map).map(Detail::Fields)
    }
}

impl<'de> Deserialize<'de> for Detail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DetailVisitor)
    }
}

impl Detail {
    pub fn scalar(text: impl Into<String>) -> Self {
        Self::Scalar(text.into())
    }

    /// Look up a field of a structured payload.
    pub fn field(&self, name: &str) -> Option<&DetailValue> {
        match self {
            Self::Scalar(_) => None,
            Self::Fields(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
        }
    }
}

// ---------------------------------------------------------------------------
// CallTreeNode: owned snapshot
// ---------------------------------------------------------------------------

/// Snapshot of a recorded tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallTreeNode {
    Root {
        label: String,
        #[serde(rename = "valueKind")]
        value_kind: String,
        children: Vec<CallTreeNode>,
    },
    Operation {
        action: OperationKind,
        detail: Option<Detail>,
        children: Vec<CallTreeNode>,
    },
}

impl CallTreeNode {
    pub fn children(&self) -> &[CallTreeNode] {
        match self {
            Self::Root { children, .. } | Self::Operation { children, .. } => children,
        }
    }

    /// Action of an operation node; `None` for roots.
    pub fn action(&self) -> Option<OperationKind> {
        match self {
            Self::Operation { action, .. } => Some(*action),
            Self::Root { .. } => None,
        }
    }

    pub fn detail(&self) -> Option<&Detail> {
        match self {
            Self::Operation { detail, .. } => detail.as_ref(),
            Self::Root { .. } => None,
        }
    }

    /// Root label; `None` for operation nodes.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Root { label, .. } => Some(label),
            Self::Operation { .. } => None,
        }
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children()
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// JSON export for snapshot/diff tooling.
    pub fn to_json(&self) -> serde_json::Value {
        // Every field is a string, sequence or enum; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// CallTree: arena plus open-node stack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum NodeKind {
    Root { label: String, value_kind: String },
    Operation { action: OperationKind, detail: Option<Detail> },
}

#[derive(Debug, Clone)]
struct NodeSlot {
    kind: NodeKind,
    children: Vec<usize>,
}

const ROOT: usize = 0;

/// Live tree being recorded into.
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<NodeSlot>,
    open: Vec<usize>,
    pushes: u64,
    pops: u64,
}

impl CallTree {
    pub fn new(label: impl Into<String>, value_kind: impl Into<String>) -> Self {
        Self {
            nodes: vec![NodeSlot {
                kind: NodeKind::Root {
                    label: label.into(),
                    value_kind: value_kind.into(),
                },
                children: Vec::new(),
            }],
            open: vec![ROOT],
            pushes: 0,
            pops: 0,
        }
    }

    /// Append an operation node under the current top and make it the top.
    pub fn push(&mut self, action: OperationKind, detail: Option<Detail>) {
        let id = self.nodes.len();
        let parent = self.open.last().copied().unwrap_or(ROOT);
        self.nodes.push(NodeSlot {
            kind: NodeKind::Operation { action, detail },
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        self.open.push(id);
        self.pushes += 1;
    }

    /// Close the current top. The root stays open.
    pub fn pop(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
            self.pops += 1;
        }
    }

    /// Number of operations currently open.
    pub fn depth(&self) -> usize {
        self.open.len() - 1
    }

    /// Every push has been matched by a pop.
    pub fn is_balanced(&self) -> bool {
        self.depth() == 0 && self.pushes == self.pops
    }

    /// Number of operations recorded so far.
    pub fn operation_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Snapshot of the whole tree.
    pub fn root(&self) -> CallTreeNode {
        self.snapshot(ROOT)
    }

    fn snapshot(&self, id: usize) -> CallTreeNode {
        let slot = &self.nodes[id];
        let children = slot.children.iter().map(|&c| self.snapshot(c)).collect();
        match &slot.kind {
            NodeKind::Root { label, value_kind } => CallTreeNode::Root {
                label: label.clone(),
                value_kind: value_kind.clone(),
                children,
            },
            NodeKind::Operation { action, detail } => CallTreeNode::Operation {
                action: *action,
                detail: detail.clone(),
                children,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

const INDENT: &str = "  ";

/// Render a tree as indented text.
///
/// Roots print as `label (kind)`, operations as their action name. Detail
/// lines sit one indent below their node; children follow one indent deeper.
pub fn render_tree(node: &CallTreeNode, indent: &str) -> String {
    let mut lines = Vec::new();
    render_node(node, indent, &mut lines);
    lines.join("\n")
}

fn render_node(node: &CallTreeNode, indent: &str, lines: &mut Vec<String>) {
    match node {
        CallTreeNode::Root {
            label, value_kind, ..
        } => lines.push(format!("{indent}{label} ({value_kind})")),
        CallTreeNode::Operation { action, detail, .. } => {
            lines.push(format!("{indent}{action}"));
            let pad = format!("{indent}{INDENT}");
            match detail {
                Some(Detail::Scalar(text)) => lines.push(format!("{pad}detail: {text}")),
                Some(Detail::Fields(fields)) => render_fields(fields, &pad, lines),
                None => {}
            }
        }
    }

    let child_indent = format!("{indent}{INDENT}");
    for child in node.children() {
        render_node(child, &child_indent, lines);
    }
}

fn render_fields(fields: &[(String, DetailValue)], pad: &str, lines: &mut Vec<String>) {
    for (key, value) in fields {
        match value {
            DetailValue::Scalar(text) => lines.push(format!("{pad}{key}: {text}")),
            DetailValue::Function => lines.push(format!("{pad}{key}: [Function]")),
            DetailValue::Record(inner) => {
                lines.push(format!("{pad}{key}:"));
                render_fields(inner, &format!("{pad}{INDENT}"), lines);
            }
            DetailValue::List(items) => {
                lines.push(format!("{pad}{key}:"));
                let indexed: Vec<(String, DetailValue)> = items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item.clone()))
                    .collect();
                render_fields(&indexed, &format!("{pad}{INDENT}"), lines);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_under_current_top() {
        let mut tree = CallTree::new("root", "object");
        tree.push(OperationKind::Apply, None);
        tree.push(OperationKind::Get, Some(Detail::scalar("x")));
        tree.pop();
        tree.push(OperationKind::Get, Some(Detail::scalar("y")));
        tree.pop();
        tree.pop();
        tree.push(OperationKind::Has, Some(Detail::scalar("z")));
        tree.pop();

        let root = tree.root();
        assert_eq!(root.children().len(), 2);
        let apply = &root.children()[0];
        assert_eq!(apply.action(), Some(OperationKind::Apply));
        let reads: Vec<_> = apply.children().iter().map(|c| c.detail().cloned()).collect();
        assert_eq!(reads, vec![Some(Detail::scalar("x")), Some(Detail::scalar("y"))]);
        assert!(tree.is_balanced());
        assert_eq!(tree.operation_count(), 4);
        assert_eq!(root.descendant_count(), 4);
    }

    #[test]
    fn root_is_never_popped() {
        let mut tree = CallTree::new("root", "object");
        tree.pop();
        tree.pop();
        assert_eq!(tree.depth(), 0);
        assert!(tree.is_balanced());
        tree.push(OperationKind::OwnKeys, None);
        assert_eq!(tree.root().children().len(), 1);
        assert!(!tree.is_balanced());
    }

    #[test]
    fn operation_kind_names() {
        assert_eq!(OperationKind::DeleteProperty.to_string(), "deleteProperty");
        assert_eq!(
            serde_json::to_value(OperationKind::GetOwnPropertyDescriptor).unwrap(),
            serde_json::json!("getOwnPropertyDescriptor")
        );
    }

    #[test]
    fn render_root_and_scalar_detail() {
        let mut tree = CallTree::new("root", "object");
        tree.push(OperationKind::Get, Some(Detail::scalar("x")));
        tree.pop();
        assert_eq!(render_tree(&tree.root(), ""), "root (object)\n  get\n    detail: x");
    }

    #[test]
    fn render_nested_fields() {
        let node = CallTreeNode::Operation {
            action: OperationKind::Apply,
            detail: Some(Detail::Fields(vec![
                ("thisArg".into(), DetailValue::scalar("undefined")),
                (
                    "argList".into(),
                    DetailValue::List(vec![DetailValue::scalar("21"), DetailValue::Function]),
                ),
            ])),
            children: vec![],
        };
        let expected = [
            "> apply",
            ">   thisArg: undefined",
            ">   argList:",
            ">     0: 21",
            ">     1: [Function]",
        ]
        .join("\n");
        assert_eq!(render_tree(&node, "> "), expected);
    }

    #[test]
    fn json_shape_matches_node_layout() {
        let mut tree = CallTree::new("root", "object");
        tree.push(OperationKind::Get, Some(Detail::scalar("x")));
        tree.pop();
        let json = tree.root().to_json();
        assert_eq!(
            json,
            serde_json::json!({
                "label": "root",
                "valueKind": "object",
                "children": [{"action": "get", "detail": "x", "children": []}],
            })
        );
        let back: CallTreeNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree.root());
    }

    #[test]
    fn structured_detail_serializes_as_ordered_object() {
        let detail = Detail::Fields(vec![
            ("prop".into(), DetailValue::scalar("cfg")),
            (
                "newVal".into(),
                DetailValue::Record(vec![
                    ("z".into(), DetailValue::Function),
                    ("a".into(), DetailValue::List(vec![DetailValue::scalar("1")])),
                ]),
            ),
        ]);
        let text = serde_json::to_string(&detail).unwrap();
        assert_eq!(text, r#"{"prop":"cfg","newVal":{"z":null,"a":["1"]}}"#);
        let back: Detail = serde_json::from_str(&text).unwrap();
        assert_eq!(back, detail);
    }
}
