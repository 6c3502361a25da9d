//! xml2Csv: one row per record element.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::json::document_text;
use super::{rows_table, ComputeContext};
use crate::core::table::SourceTable;
use crate::error::{Result, SentryError};

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn open_node(start: &BytesStart<'_>) -> Result<XmlNode> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| SentryError::xml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| SentryError::xml(e.to_string()))?;
        node.attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(node)
}

fn parse_document(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Synthetic document node holding the root element.
    let mut stack = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_node(&start)?),
            Ok(Event::Empty(start)) => {
                let node = open_node(&start)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(SentryError::xml("unbalanced closing tag"));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| SentryError::xml(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SentryError::xml(e.to_string())),
        }
    }

    match stack.pop() {
        Some(document) if stack.is_empty() => Ok(document),
        _ => Err(SentryError::xml("unexpected end of document")),
    }
}

fn find_records<'n>(node: &'n XmlNode, path: &[&str], out: &mut Vec<&'n XmlNode>) {
    match path.split_first() {
        None => out.push(node),
        Some((head, rest)) => {
            for child in node.children.iter().filter(|c| c.name == *head) {
                find_records(child, rest, out);
            }
        }
    }
}

/// `a/b` reads the text of child `b` of child `a`; `a>id` reads attribute
/// `id` of child `a`; `>id` reads an attribute of the record itself.
fn property_value(record: &XmlNode, property: &str) -> String {
    let (element_path, attribute) = match property.split_once('>') {
        Some((path, attr)) => (path, Some(attr)),
        None => (property, None),
    };

    let mut node = record;
    for segment in element_path.split('/').filter(|s| !s.is_empty()) {
        match node.child(segment) {
            Some(child) => node = child,
            None => return String::new(),
        }
    }

    match attribute {
        Some(attr) => node.attribute(attr).unwrap_or_default().to_string(),
        None => node.text.trim().to_string(),
    }
}

/// Parse `xml` and extract one row per `record_tag` element.
pub fn xml_to_rows(xml: &str, properties: &str, record_tag: &str) -> Result<Vec<Vec<String>>> {
    let document = parse_document(xml)?;
    let path: Vec<&str> = record_tag.split('/').filter(|s| !s.is_empty()).collect();
    let properties: Vec<&str> = properties
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut records = Vec::new();
    find_records(&document, &path, &mut records);

    Ok(records
        .into_iter()
        .map(|record| properties.iter().map(|p| property_value(record, p)).collect())
        .collect())
}

pub(super) fn xml2csv(table: &SourceTable, record_tag: &str, properties: &str, ctx: &ComputeContext<'_>) -> SourceTable {
    let text = match document_text(table) {
        Some(text) => text,
        None => return SourceTable::empty(),
    };

    match xml_to_rows(text, properties, record_tag) {
        Ok(rows) => rows_table(rows),
        Err(e) => {
            log::warn!(
                "Hostname {} - Unable to parse XML with record tag {}: {}",
                ctx.hostname,
                record_tag,
                e
            );
            SourceTable::empty()
        }
    }
}
