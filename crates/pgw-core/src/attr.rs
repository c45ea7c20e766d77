//! Attribute-tree codec for the portal's query protocol.
//!
//! The portal speaks a small XML dialect: `<obj>` is an object whose
//! `<att id="...">` children name nested values, `<list>` is an ordered
//! sequence, `<val>` is a scalar. Decoding is deliberately schema-tolerant:
//! the response shape is not contractually guaranteed across deployments, so
//! a missing attribute or list yields an empty result instead of an error.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{GatewayError, GatewayResult};

/// A node in the portal's attribute tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A scalar text value (`<val>`).
    Scalar(String),
    /// An ordered sequence of child values (`<list>`).
    List(Vec<AttrValue>),
    /// Named attributes in document order (`<obj>` of `<att id="...">`).
    Object(Vec<(String, AttrValue)>),
}

impl AttrValue {
    pub fn scalar(s: impl Into<String>) -> Self {
        AttrValue::Scalar(s.into())
    }

    /// Look up a named attribute on an object. Returns the first match in
    /// document order; `None` for non-objects or absent names.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        match self {
            AttrValue::Object(attrs) => {
                attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Scalar text of this node, if it is a scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// List items of this node, if it is a list.
    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Serialize this tree into the portal's XML dialect.
    pub fn to_xml(&self) -> GatewayResult<String> {
        let mut writer = Writer::new(Vec::new());
        write_value(&mut writer, self)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| GatewayError::Codec(e.to_string()))
    }
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &AttrValue) -> GatewayResult<()> {
    match value {
        AttrValue::Scalar(text) => {
            writer
                .write_event(Event::Start(BytesStart::new("val")))
                .map_err(codec_err)?;
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(codec_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("val")))
                .map_err(codec_err)?;
        }
        AttrValue::List(items) => {
            writer
                .write_event(Event::Start(BytesStart::new("list")))
                .map_err(codec_err)?;
            for item in items {
                write_value(writer, item)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("list")))
                .map_err(codec_err)?;
        }
        AttrValue::Object(attrs) => {
            writer
                .write_event(Event::Start(BytesStart::new("obj")))
                .map_err(codec_err)?;
            for (name, child) in attrs {
                let mut att = BytesStart::new("att");
                att.push_attribute(("id", name.as_str()));
                writer.write_event(Event::Start(att)).map_err(codec_err)?;
                write_value(writer, child)?;
                writer
                    .write_event(Event::End(BytesEnd::new("att")))
                    .map_err(codec_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("obj")))
                .map_err(codec_err)?;
        }
    }
    Ok(())
}

fn codec_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Codec(e.to_string())
}

/// A tenant-listing query against the portal database.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub start_from: u32,
    pub count_limit: u32,
    /// Field names to include in each returned object.
    pub include: Vec<String>,
}

impl QuerySpec {
    pub fn new(start_from: u32, count_limit: u32, include: Vec<String>) -> Self {
        Self {
            start_from,
            count_limit,
            include,
        }
    }

    /// Build the query tree: `type`="db", `name`="query", and a `param`
    /// object carrying the pagination window and include list.
    pub fn to_tree(&self) -> AttrValue {
        AttrValue::Object(vec![
            ("type".into(), AttrValue::scalar("db")),
            ("name".into(), AttrValue::scalar("query")),
            (
                "param".into(),
                AttrValue::Object(vec![
                    (
                        "startFrom".into(),
                        AttrValue::scalar(self.start_from.to_string()),
                    ),
                    (
                        "countLimit".into(),
                        AttrValue::scalar(self.count_limit.to_string()),
                    ),
                    (
                        "include".into(),
                        AttrValue::List(
                            self.include.iter().map(AttrValue::scalar).collect(),
                        ),
                    ),
                ]),
            ),
        ])
    }

    /// Serialize the query to the portal's wire form.
    pub fn to_xml(&self) -> GatewayResult<String> {
        self.to_tree().to_xml()
    }
}

/// One frame of the parse stack: an object or list under construction,
/// plus (for objects) the `id` of the `<att>` currently open.
enum Frame {
    Obj {
        attrs: Vec<(String, AttrValue)>,
        pending_att: Option<String>,
    },
    List(Vec<AttrValue>),
}

/// Parse an attribute-tree document.
///
/// Elements other than `obj`/`att`/`list`/`val` are skipped. A document with
/// no recognized root parses to an empty object. Structurally broken XML
/// (mismatched tags, truncation mid-tag) is a `Codec` error; callers that
/// must never fail use [`decode_tenant_names`] instead.
pub fn parse(xml: &str) -> GatewayResult<AttrValue> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<AttrValue> = None;
    let mut in_val = false;
    let mut val_buf = String::new();

    loop {
        match reader.read_event().map_err(codec_err)? {
            Event::Start(e) => match e.name().as_ref() {
                b"obj" => stack.push(Frame::Obj {
                    attrs: Vec::new(),
                    pending_att: None,
                }),
                b"list" => stack.push(Frame::List(Vec::new())),
                b"att" => {
                    let id = e
                        .try_get_attribute("id")
                        .ok()
                        .flatten()
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    if let Some(Frame::Obj { pending_att, .. }) = stack.last_mut() {
                        *pending_att = Some(id);
                    }
                }
                b"val" => {
                    in_val = true;
                    val_buf.clear();
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"val" => attach(&mut stack, &mut root, AttrValue::Scalar(String::new())),
                b"obj" => attach(&mut stack, &mut root, AttrValue::Object(Vec::new())),
                b"list" => attach(&mut stack, &mut root, AttrValue::List(Vec::new())),
                _ => {}
            },
            Event::Text(e) => {
                if in_val {
                    val_buf.push_str(&e.unescape().map_err(codec_err)?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"val" => {
                    in_val = false;
                    attach(&mut stack, &mut root, AttrValue::Scalar(std::mem::take(
                        &mut val_buf,
                    )));
                }
                b"obj" => {
                    if let Some(frame) = stack.pop() {
                        let value = match frame {
                            Frame::Obj { attrs, .. } => AttrValue::Object(attrs),
                            Frame::List(items) => AttrValue::List(items),
                        };
                        attach(&mut stack, &mut root, value);
                    }
                }
                b"list" => {
                    if let Some(frame) = stack.pop() {
                        let value = match frame {
                            Frame::List(items) => AttrValue::List(items),
                            Frame::Obj { attrs, .. } => AttrValue::Object(attrs),
                        };
                        attach(&mut stack, &mut root, value);
                    }
                }
                b"att" => {
                    // An empty <att id="..."></att> carries no value; drop it.
                    if let Some(Frame::Obj { pending_att, .. }) = stack.last_mut() {
                        *pending_att = None;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(root.unwrap_or(AttrValue::Object(Vec::new())))
}

/// Attach a completed value to the innermost open container, or make it the
/// document root when the stack is empty.
fn attach(stack: &mut Vec<Frame>, root: &mut Option<AttrValue>, value: AttrValue) {
    match stack.last_mut() {
        Some(Frame::Obj { attrs, pending_att }) => {
            let name = pending_att.take().unwrap_or_default();
            attrs.push((name, value));
        }
        Some(Frame::List(items)) => items.push(value),
        None => {
            if root.is_none() {
                *root = Some(value);
            }
        }
    }
}

/// Extract tenant names from a parsed query result: the `objects` attribute
/// of the top-level object holds a list of objects, each with a `name`
/// scalar. Anything missing yields an empty (or partial) result.
pub fn tenant_names(tree: &AttrValue) -> Vec<String> {
    let mut names = Vec::new();
    let Some(objects) = tree.get("objects").and_then(AttrValue::as_list) else {
        return names;
    };
    for item in objects {
        if let Some(name) = item.get("name").and_then(AttrValue::as_str) {
            names.push(name.to_string());
        }
    }
    names
}

/// Decode tenant names straight from a raw response body.
///
/// Best effort: unparseable input decodes to an empty sequence rather than an
/// error, because a failed listing must read as "nothing found".
pub fn decode_tenant_names(xml: &str) -> Vec<String> {
    match parse(xml) {
        Ok(tree) => tenant_names(&tree),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tenant_payload() -> &'static str {
        r#"<obj>
            <att id="objects">
                <list>
                    <obj>
                        <att id="name"><val>Acme</val></att>
                    </obj>
                    <obj>
                        <att id="name"><val>Globex</val></att>
                    </obj>
                </list>
            </att>
        </obj>"#
    }

    #[test]
    fn encode_query_round_trips() {
        let query = QuerySpec::new(0, 50, vec!["name".into()]);
        let xml = query.to_xml().unwrap();
        let tree = parse(&xml).unwrap();

        let param = tree.get("param").expect("param object");
        assert_eq!(tree.get("type").and_then(AttrValue::as_str), Some("db"));
        assert_eq!(tree.get("name").and_then(AttrValue::as_str), Some("query"));
        assert_eq!(param.get("startFrom").and_then(AttrValue::as_str), Some("0"));
        assert_eq!(
            param.get("countLimit").and_then(AttrValue::as_str),
            Some("50")
        );
        let include = param.get("include").and_then(AttrValue::as_list).unwrap();
        assert_eq!(include, &[AttrValue::scalar("name")][..]);

        // param carries exactly the three attributes.
        match param {
            AttrValue::Object(attrs) => assert_eq!(attrs.len(), 3),
            other => panic!("param is not an object: {other:?}"),
        }
    }

    #[test]
    fn encode_is_canonical() {
        let query = QuerySpec::new(10, 25, vec!["name".into(), "displayName".into()]);
        let expected = "<obj>\
            <att id=\"type\"><val>db</val></att>\
            <att id=\"name\"><val>query</val></att>\
            <att id=\"param\"><obj>\
            <att id=\"startFrom\"><val>10</val></att>\
            <att id=\"countLimit\"><val>25</val></att>\
            <att id=\"include\"><list><val>name</val><val>displayName</val></list></att>\
            </obj></att></obj>";
        assert_eq!(query.to_xml().unwrap(), expected);
    }

    #[test]
    fn decode_two_tenants_in_order() {
        let names = decode_tenant_names(two_tenant_payload());
        assert_eq!(names, vec!["Acme".to_string(), "Globex".to_string()]);
    }

    #[test]
    fn decode_is_pure() {
        let first = decode_tenant_names(two_tenant_payload());
        let second = decode_tenant_names(two_tenant_payload());
        assert_eq!(first, second);
    }

    #[test]
    fn missing_objects_attribute_is_empty() {
        let names = decode_tenant_names("<obj><att id=\"other\"><val>x</val></att></obj>");
        assert!(names.is_empty());
    }

    #[test]
    fn objects_without_list_is_empty() {
        let names =
            decode_tenant_names("<obj><att id=\"objects\"><val>not-a-list</val></att></obj>");
        assert!(names.is_empty());
    }

    #[test]
    fn children_without_name_are_skipped() {
        let xml = r#"<obj><att id="objects"><list>
            <obj><att id="name"><val>Acme</val></att></obj>
            <obj><att id="displayName"><val>no name here</val></att></obj>
        </list></att></obj>"#;
        assert_eq!(decode_tenant_names(xml), vec!["Acme".to_string()]);
    }

    #[test]
    fn malformed_xml_is_empty_not_error() {
        assert!(decode_tenant_names("<obj><att id=\"objects\">").is_empty());
        assert!(decode_tenant_names("not xml at all").is_empty());
        assert!(decode_tenant_names("").is_empty());
    }

    #[test]
    fn empty_val_element_is_empty_scalar() {
        let tree = parse("<obj><att id=\"x\"><val/></att></obj>").unwrap();
        assert_eq!(tree.get("x").and_then(AttrValue::as_str), Some(""));
    }

    #[test]
    fn escaped_text_round_trips() {
        let tree = AttrValue::Object(vec![(
            "name".into(),
            AttrValue::scalar("A&B <Tenants>"),
        )]);
        let xml = tree.to_xml().unwrap();
        let parsed = parse(&xml).unwrap();
        assert_eq!(
            parsed.get("name").and_then(AttrValue::as_str),
            Some("A&B <Tenants>")
        );
    }
}
