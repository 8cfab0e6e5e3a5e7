/// Extractor for the uploaded `.docx` legal document.
///
/// The document is an Office Open XML package. Only `word/document.xml` is read, with a
/// streaming XML reader, into a list of top-level tables. Three tables matter:
/// - the abbreviations table (second table): `abbreviation | full name`
/// - the units table (third table): `name | symbol | code`, with a header row
/// - every table whose header row mentions "Код" and "ТН ВЭД": the code listings
///
/// Merged cells are resolved the way Word lays them out on the grid: a cell spanning
/// `n` grid columns is repeated `n` times, and a vertical-merge continuation cell
/// takes the text of the cell above it.
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::code::{clean_display, CodeKey};
use crate::error::ExtractionError;
use crate::model::{CodeRecord, Unit};

const DOCUMENT_PART: &str = "word/document.xml";
const ABBREVIATIONS_TABLE: usize = 1;
const UNITS_TABLE: usize = 2;

/// A table as rows of cell texts. Paragraphs inside a cell are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Header row cells joined with single spaces, whitespace collapsed.
    pub fn header_text(&self) -> String {
        self.rows
            .first()
            .map(|row| {
                row.iter()
                    .map(|c| normalize_text(c))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    fn is_code_table(&self) -> bool {
        let header = self.header_text();
        header.contains("Код") && header.contains("ТН ВЭД")
    }
}

/// An entry of the abbreviations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abbreviation {
    pub abbreviation: String,
    pub full_name: String,
}

/// Parsed document: the top-level tables in document order.
#[derive(Debug, Clone, Default)]
pub struct Document {
    tables: Vec<Table>,
}

impl Document {
    /// Open a `.docx` package and read its tables.
    pub fn from_docx(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractionError::Archive(e.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .map_err(|_| ExtractionError::MissingPart(DOCUMENT_PART))?
            .read_to_string(&mut xml)
            .map_err(|e| ExtractionError::Archive(format!("failed to read {DOCUMENT_PART}: {e}")))?;

        let tables = parse_tables(&xml)?;
        debug!(tables = tables.len(), "parsed document tables");
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Entries of the abbreviations table. Empty when the document has no such table.
    pub fn abbreviations(&self) -> Vec<Abbreviation> {
        let mut out: Vec<Abbreviation> = Vec::new();
        let Some(table) = self.tables.get(ABBREVIATIONS_TABLE) else {
            return out;
        };

        for row in &table.rows {
            let cells: Vec<&str> = row.iter().map(|c| c.trim()).collect();
            if cells.len() < 2 || cells[0].is_empty() || cells[1].is_empty() {
                continue;
            }
            let abbreviation = cells[0].replace('\n', " / ");
            let full_name = cells[1].replace('\n', " / ");
            match out.iter_mut().find(|a| a.abbreviation == abbreviation) {
                Some(existing) => existing.full_name = full_name,
                None => out.push(Abbreviation {
                    abbreviation,
                    full_name,
                }),
            }
        }
        out
    }

    /// Entries of the units table. Empty when the document has no such table.
    pub fn units(&self) -> Vec<Unit> {
        let Some(table) = self.tables.get(UNITS_TABLE) else {
            return Vec::new();
        };

        table
            .rows
            .iter()
            .skip(1)
            .filter_map(|row| {
                if row.len() < 3 {
                    return None;
                }
                let (name, symbol, code) = (row[0].trim(), row[1].trim(), row[2].trim());
                // Section headers span the whole row and repeat the same text
                if name == symbol && symbol == code {
                    return None;
                }
                if name.is_empty() || symbol.is_empty() || code.is_empty() {
                    return None;
                }
                Some(Unit {
                    name: name.to_string(),
                    symbol: symbol.to_string(),
                    code: code.to_string(),
                })
            })
            .collect()
    }

    /// Consume the document into a lazy sequence of code records.
    ///
    /// Fails only when no code table exists. Rows with an unusable code are still
    /// yielded, with `key == None`.
    pub fn code_records(self) -> Result<CodeRecords, ExtractionError> {
        if !self.tables.iter().any(Table::is_code_table) {
            return Err(ExtractionError::NoCodeTable);
        }

        let rows: Vec<Vec<String>> = self
            .tables
            .into_iter()
            .filter(Table::is_code_table)
            .flat_map(|t| t.rows.into_iter().skip(1))
            .collect();
        Ok(CodeRecords {
            rows: rows.into_iter(),
        })
    }
}

/// Iterator over the code rows of a document. Finite and single-pass.
#[derive(Debug)]
pub struct CodeRecords {
    rows: std::vec::IntoIter<Vec<String>>,
}

impl Iterator for CodeRecords {
    type Item = CodeRecord;

    fn next(&mut self) -> Option<CodeRecord> {
        for row in self.rows.by_ref() {
            if let Some(record) = row_to_record(&row) {
                return Some(record);
            }
        }
        None
    }
}

fn row_to_record(cells: &[String]) -> Option<CodeRecord> {
    let (code, name, unit) = match cells.len() {
        n if n >= 4 => (&cells[1], &cells[2], cells[3].as_str()),
        3 if !cells[0].trim().is_empty() => (&cells[0], &cells[1], cells[2].as_str()),
        3 => (&cells[1], &cells[2], ""),
        _ => return None,
    };

    let description = normalize_text(name);
    if description.is_empty() {
        return None;
    }

    let code = clean_display(code);
    let key = match CodeKey::parse(&code) {
        Ok(key) => Some(key),
        Err(e) => {
            debug!(code = %code, error = %e, "malformed code in document");
            None
        }
    };

    Some(CodeRecord {
        code,
        description,
        unit: normalize_text(unit),
        key,
    })
}

/// Collapse whitespace runs (NBSP included) into single spaces and trim.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- document.xml reader ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VMerge {
    None,
    Restart,
    Continue,
}

#[derive(Debug)]
struct CellState {
    paragraphs: Vec<String>,
    current: String,
    span: usize,
    vmerge: VMerge,
}

impl CellState {
    fn new() -> Self {
        Self {
            paragraphs: Vec::new(),
            current: String::new(),
            span: 1,
            vmerge: VMerge::None,
        }
    }

    fn finish(mut self) -> (String, usize, VMerge) {
        if !self.current.is_empty() || self.paragraphs.is_empty() {
            self.paragraphs.push(std::mem::take(&mut self.current));
        }
        (self.paragraphs.join("\n"), self.span, self.vmerge)
    }
}

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<Vec<String>>,
    row: Vec<(String, usize, VMerge)>,
    cell: Option<CellState>,
}

impl TableState {
    /// Lay the finished row out on the grid, resolving spans and vertical merges.
    fn finish_row(&mut self) {
        let cells = std::mem::take(&mut self.row);
        let mut grid: Vec<String> = Vec::new();
        for (text, span, vmerge) in cells {
            for _ in 0..span.max(1) {
                let col = grid.len();
                let value = if vmerge == VMerge::Continue {
                    self.rows
                        .last()
                        .and_then(|above| above.get(col))
                        .cloned()
                        .unwrap_or_default()
                } else {
                    text.clone()
                };
                grid.push(value);
            }
        }
        self.rows.push(grid);
    }
}

fn parse_tables(xml: &str) -> Result<Vec<Table>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut tables: Vec<Table> = Vec::new();
    let mut table: Option<TableState> = None;
    let mut depth = 0usize;
    let mut in_run = false;
    let mut in_text = false;

    loop {
        let event = reader.read_event().map_err(|e| ExtractionError::Xml {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"tbl" => {
                    depth += 1;
                    if depth == 1 {
                        table = Some(TableState::default());
                    }
                }
                b"tc" if depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        t.cell = Some(CellState::new());
                    }
                }
                b"r" => in_run = true,
                b"t" if in_run => in_text = true,
                _ => {}
            },
            Event::Empty(ref e) => {
                let cell = table.as_mut().and_then(|t| t.cell.as_mut());
                match (e.local_name().as_ref(), cell) {
                    (b"gridSpan", Some(cell)) if depth == 1 => {
                        if let Some(n) = attr_val(e).and_then(|v| v.parse::<usize>().ok()) {
                            cell.span = n;
                        }
                    }
                    (b"vMerge", Some(cell)) if depth == 1 => {
                        cell.vmerge = match attr_val(e).as_deref() {
                            Some("restart") => VMerge::Restart,
                            _ => VMerge::Continue,
                        };
                    }
                    (b"tab", Some(cell)) if in_run => cell.current.push(' '),
                    (b"br", Some(cell)) if in_run => cell.current.push('\n'),
                    (b"p", Some(cell)) => cell.paragraphs.push(String::new()),
                    _ => {}
                }
            }
            Event::Text(ref e) if in_text => {
                if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
                    let text = e.unescape().map_err(|err| ExtractionError::Xml {
                        position: reader.buffer_position() as u64,
                        message: err.to_string(),
                    })?;
                    cell.current.push_str(&text);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => in_run = false,
                b"p" => {
                    if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
                        let paragraph = std::mem::take(&mut cell.current);
                        cell.paragraphs.push(paragraph);
                    }
                }
                b"tc" if depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        if let Some(cell) = t.cell.take() {
                            t.row.push(cell.finish());
                        }
                    }
                }
                b"tr" if depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        t.finish_row();
                    }
                }
                b"tbl" => {
                    if depth == 1 {
                        if let Some(t) = table.take() {
                            tables.push(Table { rows: t.rows });
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tables)
}

/// Value of the `w:val` attribute, if present.
fn attr_val(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"val")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
