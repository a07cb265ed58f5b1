use std::collections::HashMap;

use crate::css::{Declarations, Stylesheet, parse_declarations};
use crate::error::RenderError;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub(crate) type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShapeKind {
    Rect,
    Circle,
    Ellipse,
    Line,
    Polyline,
    Polygon,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefinitionKind {
    Defs,
    LinearGradient,
    RadialGradient,
    Stop,
    Pattern,
    ClipPath,
    Mask,
    Marker,
    ColorProfile,
    Filter,
    Style,
    Metadata,
}

/// Closed classification of an element, computed once at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Svg,
    Group,
    Symbol,
    Use,
    Switch,
    Shape(ShapeKind),
    Text,
    Image,
    Definition(DefinitionKind),
    Other,
}

impl ElementKind {
    pub fn classify(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "svg" => ElementKind::Svg,
            "g" | "a" => ElementKind::Group,
            "symbol" => ElementKind::Symbol,
            "use" => ElementKind::Use,
            "switch" => ElementKind::Switch,
            "rect" => ElementKind::Shape(ShapeKind::Rect),
            "circle" => ElementKind::Shape(ShapeKind::Circle),
            "ellipse" => ElementKind::Shape(ShapeKind::Ellipse),
            "line" => ElementKind::Shape(ShapeKind::Line),
            "polyline" => ElementKind::Shape(ShapeKind::Polyline),
            "polygon" => ElementKind::Shape(ShapeKind::Polygon),
            "path" => ElementKind::Shape(ShapeKind::Path),
            "text" => ElementKind::Text,
            "image" => ElementKind::Image,
            "defs" => ElementKind::Definition(DefinitionKind::Defs),
            "lineargradient" => ElementKind::Definition(DefinitionKind::LinearGradient),
            "radialgradient" => ElementKind::Definition(DefinitionKind::RadialGradient),
            "stop" => ElementKind::Definition(DefinitionKind::Stop),
            "pattern" => ElementKind::Definition(DefinitionKind::Pattern),
            "clippath" => ElementKind::Definition(DefinitionKind::ClipPath),
            "mask" => ElementKind::Definition(DefinitionKind::Mask),
            "marker" => ElementKind::Definition(DefinitionKind::Marker),
            "color-profile" => ElementKind::Definition(DefinitionKind::ColorProfile),
            "filter" => ElementKind::Definition(DefinitionKind::Filter),
            "style" => ElementKind::Definition(DefinitionKind::Style),
            "title" | "desc" | "metadata" | "script" => {
                ElementKind::Definition(DefinitionKind::Metadata)
            }
            _ => ElementKind::Other,
        }
    }

    pub fn is_definition(self) -> bool {
        matches!(self, ElementKind::Definition(_))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub tag: String,
    pub kind: ElementKind,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<NodeId>,
    /// Direct text; for `<text>` the whitespace-collapsed text of all descendants.
    pub text: String,
    /// Stylesheet declarations matched at parse time.
    pub css: Declarations,
    /// Parsed `style` attribute.
    pub inline: Declarations,
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id").map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn href(&self) -> Option<&str> {
        self.attribute("href")
            .or_else(|| self.attribute("xlink:href"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Fragment id of a local `#id` reference.
    pub fn href_fragment(&self) -> Option<&str> {
        self.href()
            .and_then(|v| v.strip_prefix('#'))
            .filter(|v| !v.is_empty())
    }
}

/// Immutable element arena for one render call.
#[derive(Debug, Clone)]
pub(crate) struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    ids: HashMap<String, NodeId>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, RenderError> {
        let mut options = roxmltree::ParsingOptions::default();
        options.allow_dtd = true;
        let xml = roxmltree::Document::parse_with_options(text, options)?;
        let root_elem = xml.root_element();
        if !root_elem.tag_name().name().eq_ignore_ascii_case("svg") {
            return Err(RenderError::InvalidDocument(
                "Root element must be <svg>".to_string(),
            ));
        }

        let stylesheet = Stylesheet::from_document(&xml);
        let mut nodes = Vec::new();
        let root = push_node(&mut nodes, root_elem, &stylesheet);
        let mut stack = vec![(root_elem, root)];
        while let Some((xml_node, id)) = stack.pop() {
            for child in xml_node.children().filter(|n| n.is_element()) {
                let child_id = push_node(&mut nodes, child, &stylesheet);
                nodes[id].children.push(child_id);
                stack.push((child, child_id));
            }
        }

        let mut ids = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(id) = node.id() {
                ids.entry(id.to_string()).or_insert(idx);
            }
        }

        Ok(Self { nodes, root, ids })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// First element carrying `id`.
    pub fn lookup(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id.trim()).copied()
    }

    /// Every node id in preorder (root included).
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate()
    }
}

fn push_node(
    nodes: &mut Vec<Node>,
    xml_node: roxmltree::Node<'_, '_>,
    stylesheet: &Stylesheet,
) -> NodeId {
    let tag = xml_node.tag_name().name().to_string();
    let kind = ElementKind::classify(&tag);
    let attributes = xml_node
        .attributes()
        .map(|attr| {
            let key = match attr.namespace() {
                Some(XLINK_NS) => format!("xlink:{}", attr.name()),
                Some(XML_NS) => format!("xml:{}", attr.name()),
                _ => attr.name().to_string(),
            };
            (key, attr.value().to_string())
        })
        .collect();
    let text = if kind == ElementKind::Text {
        let raw: String = xml_node
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        xml_node
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect()
    };
    let css = stylesheet.matched_declarations(xml_node);
    let inline = xml_node
        .attribute("style")
        .map(parse_declarations)
        .unwrap_or_default();
    nodes.push(Node {
        tag,
        kind,
        attributes,
        children: Vec::new(),
        text,
        css,
        inline,
    });
    nodes.len() - 1
}
