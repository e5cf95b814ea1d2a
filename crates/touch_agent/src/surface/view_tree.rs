//! View hierarchy model and editable-field discovery

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SurfaceError;

/// Screen rectangle in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }
}

/// One node of the on-screen view hierarchy
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewNode {
    pub class_name: String,
    pub text: String,
    pub resource_id: String,
    pub package: String,
    pub bounds: Bounds,
    pub editable: bool,
    pub focused: bool,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn with_focus(mut self, focused: bool) -> Self {
        self.focused = focused;
        self
    }

    pub fn with_child(mut self, child: ViewNode) -> Self {
        self.children.push(child);
        self
    }

    /// Follow a child-index path from this node
    pub fn at_path(&self, path: &[usize]) -> Option<&ViewNode> {
        path.iter()
            .try_fold(self, |node, &idx| node.children.get(idx))
    }
}

/// Handle to a node chosen as a text-input target
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    /// Child indices from the root
    pub path: Vec<usize>,
    pub bounds: Bounds,
    pub focused: bool,
    pub class_name: String,
}

impl NodeRef {
    fn from_node(node: &ViewNode, path: Vec<usize>) -> Self {
        Self {
            path,
            bounds: node.bounds,
            focused: node.focused,
            class_name: node.class_name.clone(),
        }
    }
}

/// Depth-first search for the node that should receive typed text.
///
/// Returns the first node that is both editable and focused, stopping there;
/// otherwise the first editable node seen in pre-order.
pub fn find_editable_focus_target(root: &ViewNode) -> Option<NodeRef> {
    let mut first_editable: Option<NodeRef> = None;
    let mut stack: Vec<(&ViewNode, Vec<usize>)> = vec![(root, Vec::new())];

    while let Some((node, path)) = stack.pop() {
        if node.editable {
            if node.focused {
                return Some(NodeRef::from_node(node, path));
            }
            if first_editable.is_none() {
                first_editable = Some(NodeRef::from_node(node, path.clone()));
            }
        }
        for (idx, child) in node.children.iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(idx);
            stack.push((child, child_path));
        }
    }

    first_editable
}

lazy_static! {
    static ref NODE_TAG: Regex = Regex::new(r#"<node\b([^>]*?)(/?)>|</node>"#).unwrap();
    static ref ATTRIBUTE: Regex = Regex::new(r#"([\w:-]+)="([^"]*)""#).unwrap();
    static ref BOUNDS: Regex = Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").unwrap();
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

fn is_editable_class(class_name: &str) -> bool {
    class_name.ends_with("EditText") || class_name.ends_with("AutoCompleteTextView")
}

fn node_from_attributes(attrs: &str) -> ViewNode {
    let mut node = ViewNode::default();
    for cap in ATTRIBUTE.captures_iter(attrs) {
        let value = unescape(&cap[2]);
        match &cap[1] {
            "class" => node.class_name = value,
            "text" => node.text = value,
            "resource-id" => node.resource_id = value,
            "package" => node.package = value,
            "focused" => node.focused = value == "true",
            "bounds" => {
                if let Some(b) = BOUNDS.captures(&value) {
                    let n = |i: usize| b[i].parse::<i32>().unwrap_or(0);
                    node.bounds = Bounds::new(n(1), n(2), n(3), n(4));
                }
            }
            _ => {}
        }
    }
    node.editable = is_editable_class(&node.class_name);
    node
}

/// Parse a UI-hierarchy XML dump (as produced by `uiautomator dump`)
pub fn parse_hierarchy_xml(xml: &str) -> Result<Option<ViewNode>, SurfaceError> {
    let mut stack: Vec<ViewNode> = Vec::new();
    let mut roots: Vec<ViewNode> = Vec::new();

    let attach = |node: ViewNode, stack: &mut Vec<ViewNode>, roots: &mut Vec<ViewNode>| {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    };

    for cap in NODE_TAG.captures_iter(xml) {
        match cap.get(1) {
            Some(attrs) => {
                let node = node_from_attributes(attrs.as_str());
                if cap.get(2).map_or(false, |m| m.as_str() == "/") {
                    attach(node, &mut stack, &mut roots);
                } else {
                    stack.push(node);
                }
            }
            None => {
                let node = stack.pop().ok_or_else(|| {
                    SurfaceError::Parse("unbalanced </node> in hierarchy dump".to_string())
                })?;
                attach(node, &mut stack, &mut roots);
            }
        }
    }

    if !stack.is_empty() {
        return Err(SurfaceError::Parse(
            "unterminated <node> in hierarchy dump".to_string(),
        ));
    }

    Ok(match roots.len() {
        0 => None,
        1 => roots.pop(),
        _ => Some(ViewNode {
            class_name: "hierarchy".to_string(),
            children: roots,
            ..Default::default()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(focused: bool, left: i32) -> ViewNode {
        ViewNode::new("android.widget.EditText")
            .with_bounds(Bounds::new(left, 0, left + 100, 50))
            .editable()
            .with_focus(focused)
    }

    #[test]
    fn test_prefers_focused_editable() {
        let root = ViewNode::new("FrameLayout")
            .with_child(ViewNode::new("LinearLayout").with_child(field(false, 0)))
            .with_child(field(true, 200));

        let target = find_editable_focus_target(&root).unwrap();
        assert!(target.focused);
        assert_eq!(target.path, vec![1]);
        assert_eq!(target.bounds.left, 200);
    }

    #[test]
    fn test_falls_back_to_first_editable_in_preorder() {
        let root = ViewNode::new("FrameLayout")
            .with_child(ViewNode::new("LinearLayout").with_child(field(false, 10)))
            .with_child(field(false, 300));

        let target = find_editable_focus_target(&root).unwrap();
        assert!(!target.focused);
        assert_eq!(target.path, vec![0, 0]);
        assert_eq!(root.at_path(&target.path).unwrap().bounds.left, 10);
    }

    #[test]
    fn test_focus_alone_is_not_editable() {
        let root = ViewNode::new("FrameLayout")
            .with_child(ViewNode::new("android.widget.Button").with_focus(true))
            .with_child(ViewNode::new("android.widget.EditText").editable());

        let target = find_editable_focus_target(&root).unwrap();
        assert_eq!(target.path, vec![1]);
        assert!(!target.focused);
    }

    #[test]
    fn test_no_editable_nodes() {
        let root = ViewNode::new("FrameLayout").with_child(ViewNode::new("TextView"));
        assert!(find_editable_focus_target(&root).is_none());
    }

    #[test]
    fn test_parse_uiautomator_dump() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.android.settings" focused="false" bounds="[0,0][1080,2400]">
    <node index="0" text="Search &amp; find" resource-id="com.android.settings:id/search" class="android.widget.EditText" package="com.android.settings" focused="true" bounds="[40,120][1040,220]" />
    <node index="1" text="Wi-Fi" resource-id="" class="android.widget.TextView" package="com.android.settings" focused="false" bounds="[40,300][600,360]" />
  </node>
</hierarchy>"#;

        let root = parse_hierarchy_xml(xml).unwrap().unwrap();
        assert_eq!(root.class_name, "android.widget.FrameLayout");
        assert_eq!(root.children.len(), 2);

        let search = &root.children[0];
        assert!(search.editable);
        assert!(search.focused);
        assert_eq!(search.text, "Search & find");
        assert_eq!(search.bounds, Bounds::new(40, 120, 1040, 220));
        assert_eq!(search.bounds.center(), (540, 170));
        assert!(!root.children[1].editable);
    }

    #[test]
    fn test_parse_rejects_unbalanced_dump() {
        assert!(parse_hierarchy_xml("<node class=\"a\">").is_err());
        assert!(parse_hierarchy_xml("</node>").is_err());
        assert_eq!(parse_hierarchy_xml("<hierarchy></hierarchy>").unwrap(), None);
    }
}
