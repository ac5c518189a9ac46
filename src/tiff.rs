//! Named-section IFD loader
//!
//! Reads a TIFF-structured EXIF payload into its image-file-directory
//! sections (`0th`, `Exif`, `GPS`, `Interop`, `1st`) and names tags through
//! static tables, independently of any third-party tag dictionary.

use std::collections::BTreeMap;

pub const TAG_EXIF_IFD: u16 = 0x8769;
pub const TAG_GPS_IFD: u16 = 0x8825;
pub const TAG_INTEROP_IFD: u16 = 0xA005;
pub const TAG_XML_PACKET: u16 = 0x02BC;

const MAX_ENTRIES_PER_IFD: usize = 1024;

/// Tag names for the `0th`, `Exif` and `1st` sections.
pub static TIFF_TAG_NAMES: &[(u16, &str)] = &[
    (0x0100, "ImageWidth"),
    (0x0101, "ImageLength"),
    (0x0102, "BitsPerSample"),
    (0x0103, "Compression"),
    (0x0106, "PhotometricInterpretation"),
    (0x010E, "ImageDescription"),
    (0x010F, "Make"),
    (0x0110, "Model"),
    (0x0112, "Orientation"),
    (0x011A, "XResolution"),
    (0x011B, "YResolution"),
    (0x0128, "ResolutionUnit"),
    (0x0131, "Software"),
    (0x0132, "DateTime"),
    (0x013B, "Artist"),
    (0x0201, "JPEGInterchangeFormat"),
    (0x0202, "JPEGInterchangeFormatLength"),
    (0x0213, "YCbCrPositioning"),
    (0x02BC, "XMLPacket"),
    (0x8298, "Copyright"),
    (0x829A, "ExposureTime"),
    (0x829D, "FNumber"),
    (0x8822, "ExposureProgram"),
    (0x8827, "ISOSpeedRatings"),
    (0x9000, "ExifVersion"),
    (0x9003, "DateTimeOriginal"),
    (0x9004, "DateTimeDigitized"),
    (0x9201, "ShutterSpeedValue"),
    (0x9202, "ApertureValue"),
    (0x9204, "ExposureBiasValue"),
    (0x9205, "MaxApertureValue"),
    (0x9206, "SubjectDistance"),
    (0x9207, "MeteringMode"),
    (0x9208, "LightSource"),
    (0x9209, "Flash"),
    (0x920A, "FocalLength"),
    (0x927C, "MakerNote"),
    (0x9286, "UserComment"),
    (0xA000, "FlashpixVersion"),
    (0xA001, "ColorSpace"),
    (0xA002, "PixelXDimension"),
    (0xA003, "PixelYDimension"),
    (0xA20E, "FocalPlaneXResolution"),
    (0xA20F, "FocalPlaneYResolution"),
    (0xA210, "FocalPlaneResolutionUnit"),
    (0xA402, "ExposureMode"),
    (0xA403, "WhiteBalance"),
    (0xA404, "DigitalZoomRatio"),
    (0xA405, "FocalLengthIn35mmFilm"),
    (0xA406, "SceneCaptureType"),
    (0xA420, "ImageUniqueID"),
    (0xA431, "BodySerialNumber"),
    (0xA432, "LensSpecification"),
    (0xA433, "LensMake"),
    (0xA434, "LensModel"),
    (0xC614, "UniqueCameraModel"),
    (0xC615, "LocalizedCameraModel"),
];

/// Tag names for the `GPS` section.
pub static GPS_TAG_NAMES: &[(u16, &str)] = &[
    (0x0000, "GPSVersionID"),
    (0x0001, "GPSLatitudeRef"),
    (0x0002, "GPSLatitude"),
    (0x0003, "GPSLongitudeRef"),
    (0x0004, "GPSLongitude"),
    (0x0005, "GPSAltitudeRef"),
    (0x0006, "GPSAltitude"),
    (0x0007, "GPSTimeStamp"),
    (0x0009, "GPSStatus"),
    (0x000A, "GPSMeasureMode"),
    (0x000B, "GPSDOP"),
    (0x0010, "GPSImgDirectionRef"),
    (0x0011, "GPSImgDirection"),
    (0x0012, "GPSMapDatum"),
    (0x001D, "GPSDateStamp"),
];

pub fn tiff_tag_name(tag: u16) -> Option<&'static str> {
    lookup(TIFF_TAG_NAMES, tag)
}

pub fn gps_tag_name(tag: u16) -> Option<&'static str> {
    lookup(GPS_TAG_NAMES, tag)
}

fn lookup(table: &'static [(u16, &'static str)], tag: u16) -> Option<&'static str> {
    table.iter().find(|(t, _)| *t == tag).map(|(_, name)| *name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// A decoded IFD entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum IfdValue {
    Ascii(String),
    Bytes(Vec<u8>),
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Rational(Vec<(u32, u32)>),
    SRational(Vec<(i32, i32)>),
    Float(Vec<f64>),
}

impl IfdValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            IfdValue::Bytes(b) => Some(b),
            IfdValue::Ascii(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        fn collapse(mut items: Vec<Value>) -> Value {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Value::Array(items)
            }
        }

        match self {
            IfdValue::Ascii(s) => Value::String(s.clone()),
            IfdValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).trim_end_matches('\0').to_string()),
            IfdValue::Unsigned(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
            IfdValue::Signed(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
            IfdValue::Rational(v) => collapse(
                v.iter()
                    .map(|(n, d)| rational_json(*n as f64, *d as f64))
                    .collect(),
            ),
            IfdValue::SRational(v) => collapse(
                v.iter()
                    .map(|(n, d)| rational_json(*n as f64, *d as f64))
                    .collect(),
            ),
            IfdValue::Float(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        }
    }
}

fn rational_json(num: f64, den: f64) -> serde_json::Value {
    if den == 0.0 {
        serde_json::Value::Null
    } else {
        serde_json::Value::from(num / den)
    }
}

pub type Ifd = BTreeMap<u16, IfdValue>;

/// All IFD sections of one EXIF payload.
#[derive(Debug, Clone, Default)]
pub struct IfdSections {
    pub primary: Ifd,
    pub exif: Ifd,
    pub gps: Ifd,
    pub interop: Ifd,
    pub thumbnail: Ifd,
}

impl IfdSections {
    /// Parse a TIFF header and walk the IFD chain and its sub-IFDs.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let reader = TiffReader::new(bytes)?;
        let ifd0_offset = reader.u32_at(4).ok_or("truncated TIFF header")? as usize;

        let (primary, next) = reader.read_ifd(ifd0_offset)?;
        let mut sections = IfdSections::default();

        if let Some(offset) = pointer(&primary, TAG_EXIF_IFD) {
            sections.exif = reader.read_ifd(offset).map(|(ifd, _)| ifd).unwrap_or_default();
        }
        if let Some(offset) = pointer(&primary, TAG_GPS_IFD) {
            sections.gps = reader.read_ifd(offset).map(|(ifd, _)| ifd).unwrap_or_default();
        }
        if let Some(offset) = pointer(&sections.exif, TAG_INTEROP_IFD) {
            sections.interop = reader.read_ifd(offset).map(|(ifd, _)| ifd).unwrap_or_default();
        }
        if next != 0 && next != ifd0_offset {
            sections.thumbnail = reader.read_ifd(next).map(|(ifd, _)| ifd).unwrap_or_default();
        }

        sections.primary = primary;
        Ok(sections)
    }

    /// Look a section up by its conventional name.
    pub fn section(&self, name: &str) -> Option<&Ifd> {
        match name {
            "0th" => Some(&self.primary),
            "Exif" => Some(&self.exif),
            "GPS" => Some(&self.gps),
            "Interop" => Some(&self.interop),
            "1st" => Some(&self.thumbnail),
            _ => None,
        }
    }
}

fn pointer(ifd: &Ifd, tag: u16) -> Option<usize> {
    match ifd.get(&tag)? {
        IfdValue::Unsigned(v) => v.first().map(|&o| o as usize),
        _ => None,
    }
}

struct TiffReader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> TiffReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, String> {
        let order = match bytes.get(0..2) {
            Some(b"II") => ByteOrder::Little,
            Some(b"MM") => ByteOrder::Big,
            _ => return Err("missing TIFF byte-order mark".to_string()),
        };
        let reader = Self { bytes, order };
        if reader.u16_at(2) != Some(42) {
            return Err("bad TIFF magic".to_string());
        }
        Ok(reader)
    }

    fn u16_at(&self, pos: usize) -> Option<u16> {
        let b: [u8; 2] = self.bytes.get(pos..pos + 2)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32_at(&self, pos: usize) -> Option<u32> {
        let b: [u8; 4] = self.bytes.get(pos..pos + 4)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn u64_at(&self, pos: usize) -> Option<u64> {
        let b: [u8; 8] = self.bytes.get(pos..pos + 8)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        })
    }

    /// Returns the entries and the offset of the next IFD (0 when none).
    fn read_ifd(&self, offset: usize) -> Result<(Ifd, usize), String> {
        let count = self.u16_at(offset).ok_or("IFD offset out of range")? as usize;
        if count > MAX_ENTRIES_PER_IFD {
            return Err(format!("implausible IFD entry count {}", count));
        }

        let mut ifd = Ifd::new();
        for i in 0..count {
            let entry = offset + 2 + i * 12;
            let (Some(tag), Some(kind), Some(n)) = (
                self.u16_at(entry),
                self.u16_at(entry + 2),
                self.u32_at(entry + 4),
            ) else {
                break;
            };
            if let Some(value) = self.read_value(kind, n as usize, entry + 8) {
                ifd.insert(tag, value);
            }
        }

        let next = self.u32_at(offset + 2 + count * 12).unwrap_or(0) as usize;
        Ok((ifd, next))
    }

    fn read_value(&self, kind: u16, count: usize, field: usize) -> Option<IfdValue> {
        let unit: usize = match kind {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => return None,
        };
        let size = unit.checked_mul(count)?;
        let start = if size <= 4 {
            field
        } else {
            self.u32_at(field)? as usize
        };
        let data = self.bytes.get(start..start.checked_add(size)?)?;

        let value = match kind {
            2 => IfdValue::Ascii(
                String::from_utf8_lossy(data)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string(),
            ),
            1 | 7 => IfdValue::Bytes(data.to_vec()),
            6 => IfdValue::Signed(data.iter().map(|&b| b as i8 as i64).collect()),
            3 => IfdValue::Unsigned((0..count).filter_map(|i| self.u16_at(start + i * 2)).map(u64::from).collect()),
            4 => IfdValue::Unsigned((0..count).filter_map(|i| self.u32_at(start + i * 4)).map(u64::from).collect()),
            8 => IfdValue::Signed(
                (0..count)
                    .filter_map(|i| self.u16_at(start + i * 2))
                    .map(|v| v as i16 as i64)
                    .collect(),
            ),
            9 => IfdValue::Signed(
                (0..count)
                    .filter_map(|i| self.u32_at(start + i * 4))
                    .map(|v| v as i32 as i64)
                    .collect(),
            ),
            5 => IfdValue::Rational(
                (0..count)
                    .filter_map(|i| Some((self.u32_at(start + i * 8)?, self.u32_at(start + i * 8 + 4)?)))
                    .collect(),
            ),
            10 => IfdValue::SRational(
                (0..count)
                    .filter_map(|i| {
                        Some((
                            self.u32_at(start + i * 8)? as i32,
                            self.u32_at(start + i * 8 + 4)? as i32,
                        ))
                    })
                    .collect(),
            ),
            11 => IfdValue::Float(
                (0..count)
                    .filter_map(|i| self.u32_at(start + i * 4))
                    .map(|v| f32::from_bits(v) as f64)
                    .collect(),
            ),
            12 => IfdValue::Float(
                (0..count)
                    .filter_map(|i| self.u64_at(start + i * 8))
                    .map(f64::from_bits)
                    .collect(),
            ),
            _ => return None,
        };
        Some(value)
    }
}
