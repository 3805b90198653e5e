//! S3 XML documents: the handful the multipart protocol exchanges.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::ClientError;

/// Parsed `<Error>` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: Option<String>,
    pub message: Option<String>,
    pub request_id: Option<String>,
    pub resource: Option<String>,
}

/// Parsed `<CompleteMultipartUploadResult>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteDocument {
    pub location: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub etag: Option<String>,
}

/// One `<Part>` of a ListParts page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// One page of a ListParts listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPartsPage {
    pub parts: Vec<ListedPart>,
    pub is_truncated: bool,
    pub next_marker: Option<u32>,
}

enum Node<'a> {
    Open,
    Text(&'a str),
    Close(&'a str),
}

/// Walks the document, reporting each node with the element path leading to it.
fn walk(xml: &str, mut visit: impl FnMut(Node<'_>, &[String])) -> Result<(), ClientError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut path: Vec<String> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                visit(Node::Open, &path);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.push(name.clone());
                visit(Node::Open, &path);
                path.pop();
                visit(Node::Close(&name), &path);
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(malformed)?;
                visit(Node::Text(&text), &path);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                visit(Node::Text(&text), &path);
            }
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                visit(Node::Close(&name), &path);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(e)),
        }
    }
    Ok(())
}

fn malformed(e: quick_xml::Error) -> ClientError {
    ClientError::Protocol(format!("malformed XML: {e}"))
}

fn leaf(path: &[String]) -> Option<&str> {
    path.last().map(String::as_str)
}

fn root(path: &[String]) -> Option<&str> {
    path.first().map(String::as_str)
}

fn parse_number<T: std::str::FromStr>(field: &str, text: &str) -> Result<T, ClientError> {
    text.trim()
        .parse()
        .map_err(|_| ClientError::Protocol(format!("invalid {field}: {text:?}")))
}

/// Name of the document's root element.
pub fn root_element(xml: &str) -> Result<Option<String>, ClientError> {
    let mut found = None;
    walk(xml, |node, path| {
        if found.is_none() && matches!(node, Node::Open) && path.len() == 1 {
            found = path.first().cloned();
        }
    })?;
    Ok(found)
}

pub fn parse_error(xml: &str) -> Result<ErrorDocument, ClientError> {
    let mut doc = ErrorDocument::default();
    let mut is_error = false;
    walk(xml, |node, path| {
        if matches!(node, Node::Open) && path.len() == 1 {
            is_error = root(path) == Some("Error");
        }
        let Node::Text(text) = node else { return };
        if path.len() != 2 {
            return;
        }
        let slot = match leaf(path) {
            Some("Code") => &mut doc.code,
            Some("Message") => &mut doc.message,
            Some("RequestId") => &mut doc.request_id,
            Some("Resource") => &mut doc.resource,
            _ => return,
        };
        *slot = Some(text.to_string());
    })?;
    if !is_error {
        return Err(ClientError::Protocol("not an S3 error document".into()));
    }
    Ok(doc)
}

/// Extracts the `UploadId` of an `InitiateMultipartUploadResult`.
pub fn parse_initiate(xml: &str) -> Result<String, ClientError> {
    let mut upload_id = None;
    walk(xml, |node, path| {
        if let Node::Text(text) = node
            && path.len() == 2
            && leaf(path) == Some("UploadId")
        {
            upload_id = Some(text.to_string());
        }
    })?;
    upload_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClientError::Protocol("initiate response has no UploadId".into()))
}

pub fn parse_complete(xml: &str) -> Result<CompleteDocument, ClientError> {
    let mut doc = CompleteDocument::default();
    walk(xml, |node, path| {
        let Node::Text(text) = node else { return };
        if path.len() != 2 {
            return;
        }
        let slot = match leaf(path) {
            Some("Location") => &mut doc.location,
            Some("Bucket") => &mut doc.bucket,
            Some("Key") => &mut doc.key,
            Some("ETag") => &mut doc.etag,
            _ => return,
        };
        *slot = Some(text.trim_matches('"').to_string());
    })?;
    Ok(doc)
}

pub fn parse_list_parts(xml: &str) -> Result<ListPartsPage, ClientError> {
    let mut page = ListPartsPage::default();
    let mut number: Option<String> = None;
    let mut etag: Option<String> = None;
    let mut size: Option<String> = None;
    let mut truncated = String::new();
    let mut marker: Option<String> = None;
    let mut parts_raw = Vec::new();

    walk(xml, |node, path| match node {
        Node::Text(text) if path.len() == 3 && path[1] == "Part" => match leaf(path) {
            Some("PartNumber") => number = Some(text.to_string()),
            Some("ETag") => etag = Some(text.trim_matches('"').to_string()),
            Some("Size") => size = Some(text.to_string()),
            _ => {}
        },
        Node::Text(text) if path.len() == 2 => match leaf(path) {
            Some("IsTruncated") => truncated = text.to_string(),
            Some("NextPartNumberMarker") => marker = Some(text.to_string()),
            _ => {}
        },
        Node::Close("Part") if path.len() == 1 => {
            parts_raw.push((number.take(), etag.take(), size.take()));
        }
        _ => {}
    })?;

    for (number, etag, size) in parts_raw {
        let (Some(number), Some(etag)) = (number, etag) else {
            return Err(ClientError::Protocol("part entry missing PartNumber or ETag".into()));
        };
        page.parts.push(ListedPart {
            part_number: parse_number("PartNumber", &number)?,
            etag,
            size: match size {
                Some(s) => parse_number("Size", &s)?,
                None => 0,
            },
        });
    }
    page.is_truncated = truncated.eq_ignore_ascii_case("true");
    page.next_marker = match marker {
        Some(m) if !m.is_empty() => Some(parse_number("NextPartNumberMarker", &m)?),
        _ => None,
    };
    Ok(page)
}

/// Builds the `<CompleteMultipartUpload>` request body.
pub fn complete_body<'a>(parts: impl IntoIterator<Item = (u32, &'a str)>) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>\"{}\"</ETag></Part>",
            escape(etag.trim_matches('"'))
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

/// Reads back a `<CompleteMultipartUpload>` request body.
pub fn parse_complete_request(xml: &str) -> Result<Vec<(u32, String)>, ClientError> {
    let mut parts = Vec::new();
    let mut number: Option<String> = None;
    let mut etag: Option<String> = None;
    let mut raw = Vec::new();
    walk(xml, |node, path| match node {
        Node::Text(text) if path.len() == 3 => match leaf(path) {
            Some("PartNumber") => number = Some(text.to_string()),
            Some("ETag") => etag = Some(text.trim_matches('"').to_string()),
            _ => {}
        },
        Node::Close("Part") => raw.push((number.take(), etag.take())),
        _ => {}
    })?;
    for entry in raw {
        let (Some(number), Some(etag)) = entry else {
            return Err(ClientError::Protocol("part entry missing PartNumber or ETag".into()));
        };
        parts.push((parse_number("PartNumber", &number)?, etag));
    }
    Ok(parts)
}

pub fn error_document(code: &str, message: &str, request_id: Option<&str>) -> String {
    let mut doc = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>{}</Code><Message>{}</Message>",
        escape(code),
        escape(message)
    );
    if let Some(id) = request_id {
        doc.push_str(&format!("<RequestId>{}</RequestId>", escape(id)));
    }
    doc.push_str("</Error>");
    doc
}
