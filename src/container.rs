//! Image container walking
//!
//! Locates the embedded metadata blocks (EXIF payload, XMP packets, text
//! chunks) of JPEG, PNG and TIFF files without decoding any pixels.

use crate::tiff::{IfdSections, TAG_XML_PACKET};

/// JPEG APP1 signature preceding a TIFF-structured EXIF payload.
pub const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
/// JPEG APP1 signature of a standard XMP packet.
pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/";
/// PNG text keyword carrying XMP.
pub const PNG_XMP_KEYWORD: &str = "XML:com.adobe.xmp";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const MAX_SIGNATURE_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Jpeg,
    Png,
    Tiff,
    Other,
}

impl ContainerKind {
    pub fn detect(bytes: &[u8]) -> Self {
        match infer::get(bytes).map(|t| t.mime_type()) {
            Some("image/jpeg") => ContainerKind::Jpeg,
            Some("image/png") => ContainerKind::Png,
            Some("image/tiff") => ContainerKind::Tiff,
            _ if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") => ContainerKind::Tiff,
            _ => ContainerKind::Other,
        }
    }
}

/// A named metadata block found inside a container.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBlock {
    pub key: String,
    pub data: Vec<u8>,
}

/// List every metadata block the container exposes, keyed by its signature.
pub fn metadata_blocks(bytes: &[u8]) -> Vec<MetadataBlock> {
    match ContainerKind::detect(bytes) {
        ContainerKind::Jpeg => jpeg_blocks(bytes),
        ContainerKind::Png => png_blocks(bytes),
        ContainerKind::Tiff => tiff_blocks(bytes),
        ContainerKind::Other => Vec::new(),
    }
}

/// The TIFF-structured EXIF payload of the file, if any.
pub fn exif_payload(bytes: &[u8]) -> Option<Vec<u8>> {
    if ContainerKind::detect(bytes) == ContainerKind::Tiff {
        return Some(bytes.to_vec());
    }
    metadata_blocks(bytes)
        .into_iter()
        .find(|b| b.key == "Exif")
        .map(|b| b.data)
}

fn jpeg_blocks(bytes: &[u8]) -> Vec<MetadataBlock> {
    let mut blocks = Vec::new();
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return blocks;
    }

    let mut pos = 2;
    while pos + 1 < bytes.len() {
        if bytes[pos] != 0xFF {
            break; // Invalid JPEG structure
        }
        let marker = bytes[pos + 1];
        pos += 2;

        match marker {
            0xFF => {
                // Fill byte
                pos -= 1;
                continue;
            }
            0xD9 | 0xDA => break, // EOI or start of scan: no more metadata
            0x01 | 0xD0..=0xD8 => continue,
            _ => {}
        }

        if pos + 2 > bytes.len() {
            break;
        }
        let segment_len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        if segment_len < 2 || pos + segment_len > bytes.len() {
            break;
        }
        let data = &bytes[pos + 2..pos + segment_len];
        pos += segment_len;

        if !(0xE0..=0xEF).contains(&marker) {
            continue;
        }

        if marker == 0xE1 && data.starts_with(EXIF_SIGNATURE) {
            blocks.push(MetadataBlock {
                key: "Exif".to_string(),
                data: data[EXIF_SIGNATURE.len()..].to_vec(),
            });
        } else if marker == 0xE1
            && data.len() > XMP_SIGNATURE.len()
            && data.starts_with(XMP_SIGNATURE)
            && data[XMP_SIGNATURE.len()] == 0
        {
            blocks.push(MetadataBlock {
                key: String::from_utf8_lossy(XMP_SIGNATURE).to_string(),
                data: data[XMP_SIGNATURE.len() + 1..].to_vec(),
            });
        } else {
            let signature = segment_signature(data);
            let skip = (signature.len() + 1).min(data.len());
            blocks.push(MetadataBlock {
                key: format!("APP{}:{}", marker - 0xE0, signature),
                data: data[skip..].to_vec(),
            });
        }
    }

    blocks
}

fn segment_signature(data: &[u8]) -> String {
    let end = data
        .iter()
        .take(MAX_SIGNATURE_LEN)
        .position(|&b| b == 0)
        .unwrap_or_else(|| data.len().min(MAX_SIGNATURE_LEN));
    data[..end]
        .iter()
        .filter(|b| b.is_ascii_graphic())
        .map(|&b| b as char)
        .collect()
}

fn png_blocks(bytes: &[u8]) -> Vec<MetadataBlock> {
    let mut blocks = Vec::new();
    if !bytes.starts_with(PNG_SIGNATURE) {
        return blocks;
    }

    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let start = pos + 8;
        let end = match start.checked_add(len) {
            Some(end) if end <= bytes.len() => end,
            _ => break,
        };
        let data = &bytes[start..end];
        // Chunk payload is followed by a 4-byte CRC
        pos = end + 4;

        match kind {
            b"eXIf" => blocks.push(MetadataBlock {
                key: "Exif".to_string(),
                data: data.to_vec(),
            }),
            b"tEXt" => {
                if let Some(nul) = data.iter().position(|&b| b == 0) {
                    blocks.push(MetadataBlock {
                        key: String::from_utf8_lossy(&data[..nul]).to_string(),
                        data: data[nul + 1..].to_vec(),
                    });
                }
            }
            b"iTXt" => {
                if let Some(block) = parse_itxt(data) {
                    blocks.push(block);
                }
            }
            b"IEND" => break,
            _ => {}
        }
    }

    blocks
}

/// iTXt: keyword \0 compression-flag compression-method language \0 translated-keyword \0 text
fn parse_itxt(data: &[u8]) -> Option<MetadataBlock> {
    let nul = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8_lossy(&data[..nul]).to_string();
    let compressed = *data.get(nul + 1)? != 0;
    if compressed {
        return None;
    }
    let rest = data.get(nul + 3..)?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    Some(MetadataBlock {
        key: keyword,
        data: rest[translated_end + 1..].to_vec(),
    })
}

fn tiff_blocks(bytes: &[u8]) -> Vec<MetadataBlock> {
    let mut blocks = vec![MetadataBlock {
        key: "Exif".to_string(),
        data: bytes.to_vec(),
    }];
    if let Ok(sections) = IfdSections::parse(bytes) {
        if let Some(packet) = sections.primary.get(&TAG_XML_PACKET).and_then(|v| v.as_bytes()) {
            blocks.push(MetadataBlock {
                key: "XMLPacket".to_string(),
                data: packet.to_vec(),
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut seg = vec![0xFF, marker];
        seg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        seg.extend_from_slice(payload);
        seg
    }

    fn jpeg_with(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        for seg in segments {
            bytes.extend_from_slice(seg);
        }
        bytes.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9]);
        bytes
    }

    #[test]
    fn test_jpeg_blocks_are_keyed_by_signature() {
        let mut xmp = XMP_SIGNATURE.to_vec();
        xmp.push(0);
        xmp.extend_from_slice(b"<x:xmpmeta/>");
        let mut exif = EXIF_SIGNATURE.to_vec();
        exif.extend_from_slice(b"II*\0");

        let bytes = jpeg_with(&[
            app_segment(0xE0, b"JFIF\0\x01\x01"),
            app_segment(0xE1, &exif),
            app_segment(0xE1, &xmp),
        ]);

        let blocks = jpeg_blocks(&bytes);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].key, "APP0:JFIF");
        assert_eq!(blocks[1].key, "Exif");
        assert_eq!(blocks[1].data, b"II*\0");
        assert_eq!(blocks[2].key, "http://ns.adobe.com/xap/1.0/");
        assert_eq!(blocks[2].data, b"<x:xmpmeta/>");
    }

    #[test]
    fn test_truncated_jpeg_does_not_panic() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE1, 0x40, 0x00, b'E'];
        assert!(jpeg_blocks(&bytes).is_empty());
    }

    #[test]
    fn test_png_itxt_block() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        let mut data = PNG_XMP_KEYWORD.as_bytes().to_vec();
        data.extend_from_slice(&[0, 0, 0, 0, 0]);
        data.extend_from_slice(b"<x:xmpmeta/>");
        bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(b"iTXt");
        bytes.extend_from_slice(&data);
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        let blocks = png_blocks(&bytes);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].key, PNG_XMP_KEYWORD);
        assert_eq!(blocks[0].data, b"<x:xmpmeta/>");
    }

    #[test]
    fn test_unknown_container_has_no_blocks() {
        assert!(metadata_blocks(b"plain text, not an image").is_empty());
        assert_eq!(ContainerKind::detect(b"II*\0\x08\0\0\0"), ContainerKind::Tiff);
    }
}
