//! Execution tracing
//!
//! Every evaluation produces a tree recording each action, operation,
//! variable resolution and cross-regulation call. The tree is the audit
//! trail for automated legal decisions: it documents exactly how a result
//! was reached. Child order matches evaluation order.

use crate::types::{ResolveKind, TraceNodeType, Value};
use serde::Serialize;
use std::collections::HashMap;

/// A node in the execution trace tree.
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    #[serde(rename = "type")]
    pub node_type: TraceNodeType,

    /// Human-readable label (variable name, operation, call target)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// For resolve nodes: which tier produced the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_type: Option<ResolveKind>,

    /// Free-form context: parameters, uri, criteria, etc.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    pub fn new(node_type: TraceNodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            result: None,
            resolve_type: None,
            details: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_resolve_type(mut self, kind: ResolveKind) -> Self {
        self.resolve_type = Some(kind);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn add_child(&mut self, child: TraceNode) {
        self.children.push(child);
    }

    /// Render the trace as an ASCII tree.
    ///
    /// ```text
    /// [ROOT] Evaluate test_law article 1
    /// +-- [ACT] Calculate result
    /// |   `-- [OP] ADD -> 150
    /// `-- [ACT] Calculate flag
    /// ```
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.render_into(&mut lines, "");
        lines.join("\n")
    }

    fn render_into(&self, lines: &mut Vec<String>, prefix: &str) {
        let icon = match self.node_type {
            TraceNodeType::Root => "[ROOT]",
            TraceNodeType::Action => "[ACT]",
            TraceNodeType::Operation => "[OP]",
            TraceNodeType::Resolve => "[RES]",
            TraceNodeType::UriCall => "[URI]",
            TraceNodeType::Requirement => "[REQ]",
        };

        let resolve_info = match self.resolve_type {
            Some(kind) => format!(" [{kind:?}]"),
            None => String::new(),
        };

        let result_str = match &self.result {
            Some(v) => format!(" -> {}", format_compact(v)),
            None => String::new(),
        };

        lines.push(format!("{icon} {}{resolve_info}{result_str}", self.name));

        let count = self.children.len();
        for (i, child) in self.children.iter().enumerate() {
            let is_last = i == count - 1;
            let branch = if is_last { "`-- " } else { "+-- " };
            let child_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}|   ")
            };

            let mut child_lines = Vec::new();
            child.render_into(&mut child_lines, &child_prefix);
            for (j, line) in child_lines.into_iter().enumerate() {
                if j == 0 {
                    // The child's header line gets the branch; deeper lines
                    // already carry their absolute prefix
                    lines.push(format!("{prefix}{branch}{line}"));
                } else {
                    lines.push(line);
                }
            }
        }
    }
}

/// Compact value formatting for trace lines.
fn format_compact(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f}"),
        Value::String(s) => {
            if s.len() > 40 {
                format!("{:?}...", &s[..37])
            } else {
                format!("{s:?}")
            }
        }
        Value::Array(a) => format!("[{} items]", a.len()),
        Value::Object(o) => format!("{{{} keys}}", o.len()),
    }
}

/// Stack-based trace assembly.
///
/// Nodes are pushed when a scope is entered and popped when it completes;
/// popping attaches the node as a child of its parent. The first node pushed
/// becomes the root. Pushes and pops must pair on every exit path, including
/// failures, so partial traces stay well-formed.
#[derive(Debug, Default)]
pub struct TraceStack {
    root: Option<TraceNode>,
    stack: Vec<TraceNode>,
}

impl TraceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a scope.
    pub fn push(&mut self, node: TraceNode) {
        self.stack.push(node);
    }

    /// Set the result of the current scope.
    pub fn set_result(&mut self, result: Value) {
        if let Some(current) = self.stack.last_mut() {
            current.result = Some(result);
        }
    }

    /// Attach a completed subtree (e.g. a sub-call trace) to the current scope.
    pub fn attach_child(&mut self, child: TraceNode) {
        if let Some(current) = self.stack.last_mut() {
            current.children.push(child);
        } else if let Some(root) = self.root.as_mut() {
            root.children.push(child);
        }
    }

    /// Leave the current scope, attaching it to its parent.
    pub fn pop(&mut self) {
        let Some(completed) = self.stack.pop() else {
            return;
        };
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(completed);
        } else if let Some(root) = self.root.as_mut() {
            root.children.push(completed);
        } else {
            self.root = Some(completed);
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Finish the trace, draining any scopes left open.
    pub fn finish(mut self) -> Option<TraceNode> {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node() {
        let mut trace = TraceStack::new();
        trace.push(TraceNode::new(TraceNodeType::Root, "root"));
        trace.set_result(Value::Int(1));
        trace.pop();

        let root = trace.finish().unwrap();
        assert_eq!(root.name, "root");
        assert_eq!(root.result, Some(Value::Int(1)));
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_nesting_matches_evaluation_order() {
        let mut trace = TraceStack::new();
        trace.push(TraceNode::new(TraceNodeType::Root, "root"));
        trace.push(TraceNode::new(TraceNodeType::Action, "first"));
        trace.pop();
        trace.push(TraceNode::new(TraceNodeType::Action, "second"));
        trace.push(TraceNode::new(TraceNodeType::Operation, "ADD"));
        trace.set_result(Value::Int(3));
        trace.pop();
        trace.pop();
        trace.pop();

        let root = trace.finish().unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].name, "first");
        assert_eq!(root.children[1].name, "second");
        assert_eq!(root.children[1].children[0].name, "ADD");
    }

    #[test]
    fn test_attach_child_subtree() {
        let mut trace = TraceStack::new();
        trace.push(TraceNode::new(TraceNodeType::Root, "root"));
        trace.push(TraceNode::new(TraceNodeType::UriCall, "Call regelrecht://a/b"));

        let sub = TraceNode::new(TraceNodeType::Root, "sub-evaluation")
            .with_result(Value::Int(42));
        trace.attach_child(sub);
        trace.pop();
        trace.pop();

        let root = trace.finish().unwrap();
        let call = &root.children[0];
        assert_eq!(call.children.len(), 1);
        assert_eq!(call.children[0].result, Some(Value::Int(42)));
    }

    #[test]
    fn test_finish_drains_open_scopes() {
        let mut trace = TraceStack::new();
        trace.push(TraceNode::new(TraceNodeType::Root, "root"));
        trace.push(TraceNode::new(TraceNodeType::Action, "left open"));

        let root = trace.finish().unwrap();
        assert_eq!(root.name, "root");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_render_tree() {
        let mut root = TraceNode::new(TraceNodeType::Root, "Evaluate test_law article 1");
        let mut action = TraceNode::new(TraceNodeType::Action, "Calculate result");
        action.add_child(
            TraceNode::new(TraceNodeType::Operation, "ADD").with_result(Value::Int(150)),
        );
        root.add_child(action);
        root.add_child(
            TraceNode::new(TraceNodeType::Resolve, "$flag")
                .with_resolve_type(ResolveKind::Parameter)
                .with_result(Value::Bool(true)),
        );

        let rendered = root.render();
        assert!(rendered.contains("[ROOT] Evaluate test_law article 1"));
        assert!(rendered.contains("[ACT] Calculate result"));
        assert!(rendered.contains("[OP] ADD -> 150"));
        assert!(rendered.contains("[RES] $flag [Parameter] -> TRUE"));
        assert!(rendered.contains("+--") || rendered.contains("`--"));
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let node = TraceNode::new(TraceNodeType::Resolve, "x").with_result(Value::Int(1));
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"type\":\"resolve\""));
        assert!(json.contains("\"result\":1"));
        assert!(!json.contains("children"));
        assert!(!json.contains("details"));
    }
}
