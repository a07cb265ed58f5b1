use lightningcss::printer::PrinterOptions;
use lightningcss::properties::Property;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;

/// Property declarations split by priority, each as (name, value) in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Declarations {
    pub normal: Vec<(String, String)>,
    pub important: Vec<(String, String)>,
}

impl Declarations {
    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.important.is_empty()
    }
}

/// Parses a `style=""` value. Falls back to a plain `;`/`:` split when the
/// CSS parser rejects the input.
pub(crate) fn parse_declarations(input: &str) -> Declarations {
    if let Ok(style_attr) = StyleAttribute::parse(input, ParserOptions::default()) {
        let normal = property_pairs(&style_attr.declarations.declarations);
        let important = property_pairs(&style_attr.declarations.important_declarations);
        if let (Some(normal), Some(important)) = (normal, important) {
            return Declarations { normal, important };
        }
    }
    parse_declarations_legacy(input)
}

fn property_pairs(props: &[Property<'_>]) -> Option<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(props.len());
    for prop in props {
        let id = prop.property_id();
        let name = id.name().to_ascii_lowercase();
        let value = prop.value_to_css_string(PrinterOptions::default()).ok()?;
        out.push((name, value));
    }
    Some(out)
}

fn parse_declarations_legacy(input: &str) -> Declarations {
    let mut out = Declarations::default();
    for decl in input.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((k, v)) = decl.split_once(':') else {
            continue;
        };
        let key = k.trim().to_ascii_lowercase();
        let mut value = v.trim();
        let mut important = false;
        if let Some(stripped) = value.strip_suffix("!important") {
            value = stripped.trim_end();
            important = true;
        }
        if key.is_empty() {
            continue;
        }
        if important {
            out.important.push((key, value.to_string()));
        } else {
            out.normal.push((key, value.to_string()));
        }
    }
    out
}

/// (ids, classes, type selectors), compared lexicographically.
type Specificity = (u16, u16, u16);

/// One compound selector such as `rect.a.b#id`. `None` tag means universal.
#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn matches(&self, node: roxmltree::Node<'_, '_>) -> bool {
        let tag_ok = self
            .tag
            .as_deref()
            .is_none_or(|tag| node.tag_name().name().eq_ignore_ascii_case(tag));
        let id_ok = self.id.as_deref().is_none_or(|id| node.attribute("id") == Some(id));
        tag_ok
            && id_ok
            && self.classes.iter().all(|wanted| {
                node.attribute("class")
                    .is_some_and(|list| list.split_whitespace().any(|c| c == wanted))
            })
    }
}

/// Descendant-combinator chain; the subject is the last compound.
#[derive(Debug, Clone, PartialEq)]
struct Selector {
    chain: Vec<Compound>,
}

impl Selector {
    fn specificity(&self) -> Specificity {
        self.chain.iter().fold((0, 0, 0), |(ids, classes, tags), part| {
            (
                ids + u16::from(part.id.is_some()),
                classes + part.classes.len() as u16,
                tags + u16::from(part.tag.is_some()),
            )
        })
    }

    fn matches(&self, node: roxmltree::Node<'_, '_>) -> bool {
        let Some((subject, ancestors)) = self.chain.split_last() else {
            return false;
        };
        subject.matches(node) && ancestors_match(ancestors, node)
    }
}

/// Matches `chain` right to left against the element ancestors of `node`,
/// taking the nearest ancestor for each compound.
fn ancestors_match(chain: &[Compound], node: roxmltree::Node<'_, '_>) -> bool {
    let Some((innermost, rest)) = chain.split_last() else {
        return true;
    };
    node.ancestors()
        .skip(1)
        .filter(|n| n.is_element())
        .find(|n| innermost.matches(*n))
        .is_some_and(|found| ancestors_match(rest, found))
}

#[derive(Debug, Clone)]
struct StyleRule {
    selector: Selector,
    specificity: Specificity,
    declarations: Declarations,
    order: usize,
}

/// Rules gathered from every `<style>` element of a document.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stylesheet {
    rules: Vec<StyleRule>,
}

impl Stylesheet {
    pub fn from_document(doc: &roxmltree::Document<'_>) -> Self {
        let mut sheet = Stylesheet::default();
        let mut order = 0usize;
        let styles = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("style"));
        for style in styles {
            let text: String = style.children().filter_map(|child| child.text()).collect();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if let Ok(parsed) = StyleSheet::parse(text, ParserOptions::default()) {
                sheet.push_rules(parsed.rules, &mut order);
            }
        }
        sheet
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Declarations that apply to `node`, ordered by specificity then source order.
    pub fn matched_declarations(&self, node: roxmltree::Node<'_, '_>) -> Declarations {
        let mut hits: Vec<&StyleRule> = self
            .rules
            .iter()
            .filter(|rule| rule.selector.matches(node))
            .collect();
        hits.sort_by_key(|rule| (rule.specificity, rule.order));
        let mut out = Declarations::default();
        for rule in hits {
            out.normal.extend_from_slice(&rule.declarations.normal);
            out.important.extend_from_slice(&rule.declarations.important);
        }
        out
    }

    /// Flattens style rules (descending into `@media`) in source order. Every
    /// style rule consumes one order slot whether or not it is kept.
    fn push_rules(&mut self, rules: lightningcss::rules::CssRuleList<'_>, order: &mut usize) {
        for rule in rules.0 {
            let style_rule = match rule {
                CssRule::Style(style_rule) => style_rule,
                CssRule::Media(media) => {
                    self.push_rules(media.rules, order);
                    continue;
                }
                _ => continue,
            };
            let slot = *order;
            *order += 1;
            let (Some(normal), Some(important)) = (
                property_pairs(&style_rule.declarations.declarations),
                property_pairs(&style_rule.declarations.important_declarations),
            ) else {
                continue;
            };
            let declarations = Declarations { normal, important };
            if declarations.is_empty() {
                continue;
            }
            let Ok(selector_text) = style_rule.selectors.to_css_string(PrinterOptions::default())
            else {
                continue;
            };
            for selector in selector_text.split(',').filter_map(parse_selector) {
                self.rules.push(StyleRule {
                    specificity: selector.specificity(),
                    selector,
                    declarations: declarations.clone(),
                    order: slot,
                });
            }
        }
    }
}

/// Accepts type, universal, class and id compounds joined by whitespace.
/// Anything else (attributes, pseudo-classes, child/sibling combinators)
/// rejects the whole selector.
fn parse_selector(raw: &str) -> Option<Selector> {
    let chain = raw
        .split_whitespace()
        .map(parse_compound)
        .collect::<Option<Vec<_>>>()?;
    (!chain.is_empty()).then_some(Selector { chain })
}

fn parse_compound(token: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let mut rest = token;
    if let Some(after) = rest.strip_prefix('*') {
        rest = after;
    } else if rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        let (name, after) = take_ident(rest);
        compound.tag = Some(name.to_ascii_lowercase());
        rest = after;
    }
    while let Some(marker) = rest.chars().next() {
        let (name, after) = take_ident(&rest[marker.len_utf8()..]);
        if name.is_empty() {
            return None;
        }
        match marker {
            '.' => compound.classes.push(name.to_string()),
            '#' if compound.id.is_none() => compound.id = Some(name.to_string()),
            _ => return None,
        }
        rest = after;
    }
    Some(compound)
}

fn take_ident(input: &str) -> (&str, &str) {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(input.len());
    input.split_at(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn inline_declarations_keep_names_and_priority() {
        let decls = parse_declarations("fill: blue; stroke-width: 2 !important");
        assert!(lookup(&decls.normal, "fill").is_some());
        let width = lookup(&decls.important, "stroke-width").expect("important width");
        assert!(width.trim().starts_with('2'));
    }

    #[test]
    fn legacy_split_handles_important_suffix() {
        let decls = parse_declarations_legacy("flood-color: red; opacity: .5 !important");
        assert_eq!(lookup(&decls.normal, "flood-color"), Some("red"));
        assert_eq!(lookup(&decls.important, "opacity"), Some(".5"));
    }

    #[test]
    fn class_and_descendant_rules_match() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg">
            <style>.group .dot { fill: #00ff00; } rect { stroke: black; }</style>
            <g class="group"><circle class="dot" r="1"/></g>
            <circle class="dot" r="2"/>
            <rect width="1" height="1"/>
        </svg>"##;
        let doc = roxmltree::Document::parse(svg).expect("xml");
        let sheet = Stylesheet::from_document(&doc);
        assert!(!sheet.is_empty());
        let circles: Vec<_> = doc
            .descendants()
            .filter(|n| n.has_tag_name("circle"))
            .collect();
        assert!(lookup(&sheet.matched_declarations(circles[0]).normal, "fill").is_some());
        assert!(lookup(&sheet.matched_declarations(circles[1]).normal, "fill").is_none());
        let rect = doc
            .descendants()
            .find(|n| n.has_tag_name("rect"))
            .expect("rect");
        assert!(lookup(&sheet.matched_declarations(rect).normal, "stroke").is_some());
    }

    #[test]
    fn unsupported_selectors_are_rejected() {
        assert!(parse_selector("g > rect").is_none());
        assert!(parse_selector("rect:hover").is_none());
        assert!(parse_selector("rect#a#b").is_none());
        assert!(parse_selector("  ").is_none());
        let sel = parse_selector("svg *.a rect#hero").expect("selector");
        assert_eq!(sel.chain.len(), 3);
        assert_eq!(sel.specificity(), (1, 1, 2));
    }

    #[test]
    fn higher_specificity_sorts_last() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg">
            <style>#hero { fill: red; } rect { fill: blue; }</style>
            <rect id="hero" width="1" height="1"/>
        </svg>"##;
        let doc = roxmltree::Document::parse(svg).expect("xml");
        let sheet = Stylesheet::from_document(&doc);
        let rect = doc
            .descendants()
            .find(|n| n.has_tag_name("rect"))
            .expect("rect");
        let decls = sheet.matched_declarations(rect);
        assert_eq!(decls.normal.len(), 2);
        assert!(matches!(
            decls.normal[1].1.as_str(),
            "red" | "#f00" | "#ff0000"
        ));
        assert_ne!(decls.normal[0].1, decls.normal[1].1);
    }
}
