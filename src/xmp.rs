//! XMP packet location and flattening.
//!
//! DJI-style drones write flight and gimbal telemetry (`drone-dji:RelativeAltitude`,
//! `drone-dji:GimbalPitchDegree`, ...) into an XMP packet, usually as attributes
//! of `rdf:Description`. Packets are flattened into a single key/value map with
//! the namespace prefix removed, so `drone-dji:RelativeAltitude` becomes
//! `RelativeAltitude`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::container::{metadata_blocks, PNG_XMP_KEYWORD, XMP_SIGNATURE};

const PACKET_START: &[u8] = b"<x:xmpmeta";
const PACKET_END: &[u8] = b"</x:xmpmeta>";

/// Prefixes that carry RDF/XML structure rather than metadata.
const STRUCTURAL_PREFIXES: &[&str] = &["rdf", "x", "xml", "xmlns", "xmpmeta"];

/// Where an XMP packet was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmpSource {
    /// The block stored under the container's conventional XMP key.
    ConventionalKey(String),
    /// A block whose key merely resembles "xmp"/"xml".
    KeyScan(String),
    /// Raw byte scan of the file for the `xmpmeta` delimiters.
    ByteScan,
}

/// Locate the XMP packet in a file image, trying progressively cruder methods.
pub fn locate_packet(file_bytes: &[u8]) -> Option<(XmpSource, Vec<u8>)> {
    let blocks = metadata_blocks(file_bytes);
    let conventional = [
        String::from_utf8_lossy(XMP_SIGNATURE).to_string(),
        PNG_XMP_KEYWORD.to_string(),
        "XMLPacket".to_string(),
    ];

    if let Some(block) = blocks
        .iter()
        .find(|b| conventional.contains(&b.key) && !b.data.is_empty())
    {
        return Some((XmpSource::ConventionalKey(block.key.clone()), block.data.clone()));
    }

    if let Some(block) = blocks.iter().find(|b| {
        let key = b.key.to_lowercase();
        (key.contains("xmp") || key.contains("xml")) && !b.data.is_empty()
    }) {
        return Some((XmpSource::KeyScan(block.key.clone()), block.data.clone()));
    }

    scan_for_packet(file_bytes).map(|packet| (XmpSource::ByteScan, packet.to_vec()))
}

/// Find the first `<x:xmpmeta ...>...</x:xmpmeta>` span in arbitrary bytes.
pub fn scan_for_packet(bytes: &[u8]) -> Option<&[u8]> {
    let start = find(bytes, PACKET_START)?;
    let end = find(&bytes[start..], PACKET_END)? + start + PACKET_END.len();
    Some(&bytes[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Flatten an XMP packet into prefix-stripped key/value pairs.
///
/// Both attribute-form (`drone-dji:GimbalPitchDegree="-90.0"`) and
/// element-form (`<tiff:Model>FC6310</tiff:Model>`) properties are read. The
/// first occurrence of a key wins.
pub fn parse_packet(packet: &[u8]) -> Map<String, Value> {
    let mut out = Map::new();
    let mut reader = Reader::from_reader(packet);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                collect_attributes(e, &mut out);
                stack.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::Empty(ref e)) => collect_attributes(e, &mut out),
            Ok(Event::Text(ref e)) => {
                if let Ok(text) = e.decode() {
                    let text = text.trim();
                    // Innermost non-structural element owns the text (rdf:li → its property)
                    let owner = stack.iter().rev().find_map(|name| property_name(name));
                    if let (false, Some(key)) = (text.is_empty(), owner) {
                        out.entry(key).or_insert_with(|| Value::String(text.to_string()));
                    }
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    out
}

fn collect_attributes(e: &BytesStart, out: &mut Map<String, Value>) {
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let Some(name) = property_name(&key) else {
            continue;
        };
        if let Ok(value) = attr.unescape_value() {
            out.entry(name)
                .or_insert_with(|| Value::String(value.trim().to_string()));
        }
    }
}

/// `prefix:Local` → `Local`, or `None` for RDF/XML structural names.
fn property_name(qualified: &str) -> Option<String> {
    let (prefix, local) = match qualified.split_once(':') {
        Some((p, l)) => (p, l),
        None => ("", qualified),
    };
    if prefix.is_empty() || STRUCTURAL_PREFIXES.contains(&prefix) || local.is_empty() {
        return None;
    }
    Some(local.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DJI_PACKET: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="DJI Meta Data"
    xmlns:tiff="http://ns.adobe.com/tiff/1.0/"
    xmlns:drone-dji="http://www.dji.com/drone-dji/1.0/"
    tiff:Make="DJI"
    drone-dji:AbsoluteAltitude="+120.53"
    drone-dji:RelativeAltitude="+85.20"
    drone-dji:GimbalPitchDegree="-72.00"
    drone-dji:GimbalYawDegree="+10.30">
   <tiff:Model>FC6310</tiff:Model>
   <dc:title><rdf:Alt><rdf:li xml:lang="x-default">DCIM</rdf:li></rdf:Alt></dc:title>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn test_parse_attributes_and_elements() {
        let map = parse_packet(DJI_PACKET.as_bytes());
        assert_eq!(map.get("RelativeAltitude"), Some(&Value::String("+85.20".to_string())));
        assert_eq!(map.get("GimbalPitchDegree"), Some(&Value::String("-72.00".to_string())));
        assert_eq!(map.get("Make"), Some(&Value::String("DJI".to_string())));
        assert_eq!(map.get("Model"), Some(&Value::String("FC6310".to_string())));
        assert_eq!(map.get("title"), Some(&Value::String("DCIM".to_string())));
        assert!(!map.contains_key("about"));
        assert!(!map.contains_key("drone-dji"));
    }

    #[test]
    fn test_byte_scan_finds_packet_in_noise() {
        let mut bytes = vec![0u8, 1, 2, 3];
        bytes.extend_from_slice(DJI_PACKET.as_bytes());
        bytes.extend_from_slice(&[9, 9, 9]);

        let (source, packet) = locate_packet(&bytes).unwrap();
        assert_eq!(source, XmpSource::ByteScan);
        assert!(packet.starts_with(PACKET_START));
        assert!(packet.ends_with(PACKET_END));
    }

    #[test]
    fn test_no_packet() {
        assert!(locate_packet(b"nothing to see here").is_none());
        assert!(scan_for_packet(b"<x:xmpmeta but never closed").is_none());
    }

    #[test]
    fn test_property_name() {
        assert_eq!(property_name("drone-dji:GimbalRollDegree"), Some("GimbalRollDegree".to_string()));
        assert_eq!(property_name("rdf:about"), None);
        assert_eq!(property_name("xmlns:tiff"), None);
        assert_eq!(property_name("unprefixed"), None);
    }
}
