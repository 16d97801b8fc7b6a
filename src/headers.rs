//! Case metadata and header section payload builders
//!
//! EWF stores case information in up to three section payloads, all
//! zlib-compressed:
//!
//! - `header`  - tab-delimited ASCII table (all formats)
//! - `header2` - the same table encoded UTF-16LE (EnCase 4 and later)
//! - `xheader` - XML rendition (libewf extended format)
//!
//! The field columns of the classic table are:
//! `c` case number, `n` evidence number, `a` description, `e` examiner,
//! `t` notes, `av` acquisition software version, `ov` acquisition OS,
//! `m` acquiry date, `u` system date, `p` password hash.

use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use serde::Serialize;
use std::io::Write;

use crate::error::{EwfError, EwfResult};
use crate::format::{CompressionLevel, Format};

/// Case information supplied by the caller
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeaderValues {
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub examiner_name: Option<String>,
    pub evidence_number: Option<String>,
    pub notes: Option<String>,
    pub acquiry_operating_system: Option<String>,
    pub acquiry_software_version: Option<String>,
    /// When the acquisition ran; defaults to now
    pub acquiry_date: Option<DateTime<Utc>>,
    /// When the image was written; defaults to now
    pub system_date: Option<DateTime<Utc>>,
}

/// Digests of the imaged media, supplied by the caller before finalize
#[derive(Debug, Clone, Copy, Default)]
pub struct HashValues {
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
}

/// The compressed header payloads written at the start of segment one
#[derive(Debug, Clone)]
pub struct HeaderSections {
    pub header: Vec<u8>,
    pub header2: Option<Vec<u8>>,
    pub xheader: Option<Vec<u8>>,
}

/// Which header sections a format writes, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSectionKind {
    Header,
    Header2,
    Xheader,
}

/// The header section sequence for segment one of the given format
pub fn header_plan(format: Format) -> &'static [HeaderSectionKind] {
    use HeaderSectionKind::{Header, Header2, Xheader};
    match format {
        // SMART-style images carry a single header
        Format::Ewf | Format::Smart => &[Header],
        // EnCase 1 through 3, linen and FTK write the header twice
        Format::Encase1 | Format::Encase2 | Format::Encase3 | Format::Linen | Format::Ftk => {
            &[Header, Header]
        }
        // EnCase 4+ leads with two UTF-16 headers
        Format::Encase4 | Format::Encase5 | Format::Encase6 => &[Header2, Header2, Header],
        Format::Ewfx => &[Xheader, Header2, Header],
    }
}

/// Build the compressed header payloads for a write
pub fn build_header_sections(
    values: &HeaderValues,
    format: Format,
    compression_level: CompressionLevel,
) -> EwfResult<HeaderSections> {
    let acquiry_date = values.acquiry_date.unwrap_or_else(Utc::now);
    let system_date = values.system_date.unwrap_or_else(Utc::now);

    // The header payload is always compressed, even at image level none
    let level = match compression_level {
        CompressionLevel::None => CompressionLevel::Default,
        other => other,
    };

    let plan = header_plan(format);

    let header = compress_payload(
        header_string(values, acquiry_date, system_date).as_bytes(),
        level,
    )?;
    let header2 = if plan.contains(&HeaderSectionKind::Header2) {
        Some(compress_payload(
            &utf16le_with_bom(&header2_string(values, acquiry_date, system_date)),
            level,
        )?)
    } else {
        None
    };
    let xheader = if plan.contains(&HeaderSectionKind::Xheader) {
        Some(compress_payload(
            xheader_string(values, acquiry_date, system_date).as_bytes(),
            level,
        )?)
    } else {
        None
    };

    Ok(HeaderSections {
        header,
        header2,
        xheader,
    })
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// The classic tab-delimited ASCII header table
fn header_string(
    values: &HeaderValues,
    acquiry_date: DateTime<Utc>,
    system_date: DateTime<Utc>,
) -> String {
    format!(
        "1\nmain\nc\tn\ta\te\tt\tav\tov\tm\tu\tp\n{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t0\n\n",
        field(&values.case_number),
        field(&values.evidence_number),
        field(&values.description),
        field(&values.examiner_name),
        field(&values.notes),
        field(&values.acquiry_software_version),
        field(&values.acquiry_operating_system),
        acquiry_date.timestamp(),
        system_date.timestamp(),
    )
}

/// The EnCase 4+ dialect of the table, encoded UTF-16LE by the caller
fn header2_string(
    values: &HeaderValues,
    acquiry_date: DateTime<Utc>,
    system_date: DateTime<Utc>,
) -> String {
    format!(
        "3\nmain\na\tc\tn\te\tt\tav\tov\tm\tu\tp\n{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t0\n\n",
        field(&values.description),
        field(&values.case_number),
        field(&values.evidence_number),
        field(&values.examiner_name),
        field(&values.notes),
        field(&values.acquiry_software_version),
        field(&values.acquiry_operating_system),
        acquiry_date.timestamp(),
        system_date.timestamp(),
    )
}

/// The XML rendition used by the libewf extended format
fn xheader_string(
    values: &HeaderValues,
    acquiry_date: DateTime<Utc>,
    system_date: DateTime<Utc>,
) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
    let mut tag = |name: &str, value: &str| {
        if !value.is_empty() {
            xml.push_str(&format!("\t<{0}>{1}</{0}>\n", name, value));
        }
    };
    tag("case_number", field(&values.case_number));
    tag("description", field(&values.description));
    tag("examiner_name", field(&values.examiner_name));
    tag("evidence_number", field(&values.evidence_number));
    tag("notes", field(&values.notes));
    tag(
        "acquiry_operating_system",
        field(&values.acquiry_operating_system),
    );
    tag(
        "acquiry_software_version",
        field(&values.acquiry_software_version),
    );
    tag(
        "acquiry_date",
        &acquiry_date.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    tag(
        "system_date",
        &system_date.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    xml.push_str("</xheader>\n");
    xml
}

/// Encode a string as UTF-16LE with a byte order mark
fn utf16le_with_bom(text: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(2 + text.len() * 2);
    encoded.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        encoded.extend_from_slice(&unit.to_le_bytes());
    }
    encoded
}

fn compress_payload(data: &[u8], level: CompressionLevel) -> EwfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| EwfError::CompressionFailed(format!("header payload: {}", e)))
}
