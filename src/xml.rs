//! `<root><reading key="value" .../></root>` documents.

use std::io::Cursor;

#[cfg(test)]
use quick_xml::Reader;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, Event},
    Writer,
};

/// Attribute pairs of one `<reading/>` element, in document order.
#[cfg(test)]
pub(crate) type Record = Vec<(String, String)>;

const ROOT: &str = "root";
const ELEMENT: &str = "reading";

pub(crate) fn encode<K, V>(records: &[Vec<(K, V)>]) -> Result<String, quick_xml::Error>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, Some("yes"))))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT)))?;
    for record in records {
        let mut element = BytesStart::new(ELEMENT);
        for (key, value) in record {
            element.push_attribute((key.as_ref(), value.as_ref()));
        }
        writer.write_event(Event::Empty(element))?;
    }
    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
pub(crate) fn decode(document: &str) -> Result<Vec<Record>, quick_xml::Error> {
    let mut reader = Reader::from_str(document);
    reader.trim_text(true);
    let mut records = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(element) | Event::Start(element)
                if element.name().as_ref() == ELEMENT.as_bytes() =>
            {
                let mut record = Record::new();
                for attribute in element.attributes() {
                    let attribute = attribute?;
                    let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
                    let value = attribute.unescape_value()?.into_owned();
                    record.push((key, value));
                }
                records.push(record);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn encodes_wrapped_empty_elements() {
        let document = encode(&[record(&[("device", "A"), ("temperature", "21.5")])]).unwrap();
        assert_eq!(
            document,
            r#"<?xml version="1.0" standalone="yes"?><root><reading device="A" temperature="21.5"/></root>"#
        );
    }

    #[test]
    fn empty_batch_is_bare_root() {
        let document = encode::<&str, &str>(&[]).unwrap();
        assert!(document.ends_with("<root></root>"));
        assert!(decode(&document).unwrap().is_empty());
    }

    #[test]
    fn round_trip_keeps_order_and_reserved_characters() {
        let records = vec![
            record(&[("device", "lab \"north\""), ("note", "<a & b>")]),
            record(&[("device", "b"), ("humidity", "40")]),
        ];
        let decoded = decode(&encode(&records).unwrap()).unwrap();
        assert_eq!(decoded, records);
    }
}
