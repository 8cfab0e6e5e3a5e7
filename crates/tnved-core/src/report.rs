/// Spreadsheet rendering of merged records.
///
/// The workbook is written directly as an Office Open XML package: a zip archive of
/// SpreadsheetML parts with one worksheet, a shared-strings table and a small style
/// sheet for the header row.
use std::collections::HashMap;
use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::RenderError;
use crate::model::MergedRecord;

pub const SHEET_NAME: &str = "ТН ВЭД";
pub const REPORT_FILE_NAME: &str = "tn_ved_processed.xlsx";
pub const CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// (header, width) per column, in output order.
pub const COLUMNS: [(&str, f64); 6] = [
    ("Код ТН ВЭД", 20.0),
    ("Наименование позиции", 70.0),
    ("Ставка пошлины", 25.0),
    ("Статус", 16.0),
    ("Доп. ед. изм.", 15.0),
    ("Код ед. изм.", 12.0),
];

const HEADER_STYLE: u32 = 1;
const BODY_STYLE: u32 = 2;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;

// Fill 2 is the header blue, border 1 is thin on all sides.
const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font><font><b/><sz val="11"/><color rgb="FFFFFFFF"/><name val="Calibri"/><family val="2"/></font></fonts><fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FF4472C4"/><bgColor indexed="64"/></patternFill></fill></fills><borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thin"><color auto="1"/></left><right style="thin"><color auto="1"/></right><top style="thin"><color auto="1"/></top><bottom style="thin"><color auto="1"/></bottom><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="2" borderId="1" xfId="0" applyFont="1" applyFill="1" applyBorder="1" applyAlignment="1"><alignment horizontal="center" vertical="center" wrapText="1"/></xf><xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

/// Render the records as an `.xlsx` workbook, one row per record after the header.
pub fn render_report(records: &[MergedRecord]) -> Result<Vec<u8>, RenderError> {
    let mut strings = SharedStrings::default();
    let sheet = worksheet_xml(records, &mut strings)?;
    let workbook = workbook_xml();
    let shared = strings.to_xml();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let parts: [(&str, &[u8]); 7] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
        ("_rels/.rels", ROOT_RELS_XML.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.as_bytes()),
        ("xl/styles.xml", STYLES_XML.as_bytes()),
        ("xl/sharedStrings.xml", shared.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
    ];
    for (name, content) in parts {
        zip.start_file(name, options)?;
        zip.write_all(content)?;
    }

    Ok(zip.finish()?.into_inner())
}

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape(SHEET_NAME)
    )
}

fn row_values(record: &MergedRecord) -> [&str; 6] {
    [
        record.code.as_str(),
        record.description.as_str(),
        record.rate.as_ref().map(|r| r.as_str()).unwrap_or(""),
        record.status.as_str(),
        record.unit.as_str(),
        record.unit_code.as_str(),
    ]
}

fn worksheet_xml(records: &[MergedRecord], strings: &mut SharedStrings) -> Result<String, RenderError> {
    let last_row = records.len() + 1;
    let mut xml = String::with_capacity(256 + records.len() * 256);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    xml.push_str(r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#);
    xml.push_str(&format!(r#"<dimension ref="A1:{}{last_row}"/>"#, column_letter(COLUMNS.len() - 1)));
    xml.push_str(
        r#"<sheetViews><sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/><selection pane="bottomLeft"/></sheetView></sheetViews>"#,
    );

    xml.push_str("<cols>");
    for (i, (_, width)) in COLUMNS.iter().enumerate() {
        let n = i + 1;
        xml.push_str(&format!(r#"<col min="{n}" max="{n}" width="{width}" customWidth="1"/>"#));
    }
    xml.push_str("</cols><sheetData>");

    let headers = COLUMNS.map(|(header, _)| header);
    write_row(&mut xml, strings, 1, &headers, HEADER_STYLE)?;
    for (i, record) in records.iter().enumerate() {
        write_row(&mut xml, strings, i + 2, &row_values(record), BODY_STYLE)?;
    }

    xml.push_str("</sheetData></worksheet>");
    Ok(xml)
}

fn write_row(
    xml: &mut String,
    strings: &mut SharedStrings,
    row: usize,
    values: &[&str],
    style: u32,
) -> Result<(), RenderError> {
    xml.push_str(&format!(r#"<row r="{row}">"#));
    for (col, value) in values.iter().enumerate() {
        let reference = format!("{}{row}", column_letter(col));
        // empty text stays a styled blank cell so it reads back as empty
        if value.is_empty() {
            xml.push_str(&format!(r#"<c r="{reference}" s="{style}"/>"#));
            continue;
        }
        if !is_xml_text(value) {
            return Err(RenderError::InvalidCharacter {
                row,
                column: col + 1,
            });
        }
        let index = strings.index(value);
        xml.push_str(&format!(r#"<c r="{reference}" s="{style}" t="s"><v>{index}</v></c>"#));
    }
    xml.push_str("</row>");
    Ok(())
}

/// Column index (0-based) to its letter. The sheet never goes past `Z`.
fn column_letter(col: usize) -> char {
    (b'A' + col as u8) as char
}

/// XML 1.0 `Char` production, minus what a Rust `char` already excludes.
fn is_xml_text(s: &str) -> bool {
    s.chars().all(|c| {
        matches!(c, '\t' | '\n' | '\r') || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
    })
}

#[derive(Default)]
struct SharedStrings {
    strings: Vec<String>,
    index: HashMap<String, usize>,
    /// Total references, including repeats
    count: usize,
}

impl SharedStrings {
    fn index(&mut self, s: &str) -> usize {
        self.count += 1;
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len();
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{}" uniqueCount="{}">"#,
            self.count,
            self.strings.len()
        );
        for s in &self.strings {
            xml.push_str(&format!(r#"<si><t xml:space="preserve">{}</t></si>"#, escape(s.as_str())));
        }
        xml.push_str("</sst>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};

    use super::*;
    use crate::code::CodeKey;
    use crate::model::{DutyRate, MatchStatus};

    fn record(code: &str, description: &str, rate: Option<&str>, status: MatchStatus) -> MergedRecord {
        MergedRecord {
            code: code.to_string(),
            description: description.to_string(),
            unit: "шт".to_string(),
            unit_code: "796".to_string(),
            rate: rate.map(DutyRate::new),
            rate_key: CodeKey::parse(code).ok(),
            status,
        }
    }

    fn read_back(bytes: Vec<u8>) -> Vec<Vec<String>> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        let range = workbook.worksheet_range(SHEET_NAME).unwrap();
        range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Data::String(s) => s.clone(),
                        Data::Empty => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_round_trip_through_reader() {
        let records = vec![
            record("1234.56.00", "Widgets", Some("10%"), MatchStatus::Matched),
            record("9999.99.99", "Unknown", None, MatchStatus::RateMissing),
            record("из8703", "Автомобили <прочие> & \"иные\"", None, MatchStatus::CodeMalformed),
            record("0101", "Widgets", Some("20, но не менее 0,3 долл. США за килограмм"), MatchStatus::Matched),
        ];

        let rows = read_back(render_report(&records).unwrap());

        assert_eq!(rows.len(), records.len() + 1);
        let headers: Vec<&str> = COLUMNS.iter().map(|(h, _)| *h).collect();
        assert_eq!(rows[0], headers);
        for (row, record) in rows[1..].iter().zip(&records) {
            assert_eq!(row[0], record.code);
            assert_eq!(row[1], record.description);
            assert_eq!(row[2], record.rate.as_ref().map(|r| r.as_str()).unwrap_or(""));
            assert_eq!(row[3], record.status.as_str());
            assert_eq!(row[4], "шт");
            assert_eq!(row[5], "796");
        }
    }

    #[test]
    fn test_empty_report_has_header_only() {
        let rows = read_back(render_report(&[]).unwrap());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "Код ТН ВЭД");
    }

    #[test]
    fn test_package_layout() {
        let bytes = render_report(&[record("0101", "Лошади", Some("5"), MatchStatus::Matched)]).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        assert!(sheet.contains(r#"state="frozen""#));
        assert!(sheet.contains(r#"<col min="2" max="2" width="70" customWidth="1"/>"#));

        let mut styles = String::new();
        archive
            .by_name("xl/styles.xml")
            .unwrap()
            .read_to_string(&mut styles)
            .unwrap();
        assert!(styles.contains("FF4472C4"));

        let mut strings = String::new();
        archive
            .by_name("xl/sharedStrings.xml")
            .unwrap()
            .read_to_string(&mut strings)
            .unwrap();
        // 6 headers + "0101", "Лошади", "5", "matched", "шт", "796"
        assert!(strings.contains(r#"uniqueCount="12""#));
    }

    #[test]
    fn test_shared_strings_deduplicated() {
        let records = vec![
            record("0101", "Same", Some("5"), MatchStatus::Matched),
            record("0102", "Same", Some("5"), MatchStatus::Matched),
        ];
        let mut strings = SharedStrings::default();
        worksheet_xml(&records, &mut strings).unwrap();
        assert_eq!(strings.count, 6 + 12);
        assert_eq!(strings.strings.iter().filter(|s| *s == "Same").count(), 1);
    }

    #[test]
    fn test_control_character_rejected() {
        let records = vec![
            record("0101", "ok", None, MatchStatus::RateMissing),
            record("0102", "bad\u{1}text", None, MatchStatus::RateMissing),
        ];
        match render_report(&records) {
            Err(RenderError::InvalidCharacter { row, column }) => {
                assert_eq!(row, 3);
                assert_eq!(column, 2);
            }
            other => panic!("expected InvalidCharacter, got {other:?}"),
        }
    }

    #[test]
    fn test_tabs_and_newlines_allowed() {
        assert!(is_xml_text("a\tb\nc\r"));
        assert!(!is_xml_text("\u{0}"));
        assert!(!is_xml_text("\u{FFFF}"));
    }
}
