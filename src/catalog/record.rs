use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::{
    catalog::CatalogEntry,
    embedding::Embedding,
    error::{ForensicsError, Result},
};

pub const HEADER_PREFIX: &str = "#catalog";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub dimension: Option<usize>,
    pub entries: Vec<CatalogEntry>,
    pub has_header: bool,
    pub ends_with_newline: bool,
}

pub fn format_header(dimension: usize) -> String {
    format!("{HEADER_PREFIX} v{FORMAT_VERSION} dim={dimension}")
}

/// Labels are stored as the first CSV field. Commas and quotes are quoted by
/// the writer; anything that would not survive a trimmed, line-based read is
/// refused.
pub fn validate_label(label: &str) -> Result<()> {
    if label.trim().is_empty()
        || label.trim() != label
        || label.contains('\n')
        || label.contains('\r')
        || label.starts_with('#')
    {
        return Err(ForensicsError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

fn parse_header(line: &[u8], line_no: usize) -> Result<usize> {
    let format_err = |reason: String| ForensicsError::CatalogFormat {
        line: line_no,
        reason,
    };

    let line =
        std::str::from_utf8(line).map_err(|_| format_err("header is not valid UTF-8".into()))?;
    let mut parts = line.split_whitespace();
    parts.next();

    let version = parts
        .next()
        .and_then(|v| v.strip_prefix('v'))
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| format_err("missing format version".into()))?;
    if version != FORMAT_VERSION {
        return Err(format_err(format!("unsupported format version {version}")));
    }

    parts
        .next()
        .and_then(|d| d.strip_prefix("dim="))
        .and_then(|d| d.parse::<usize>().ok())
        .ok_or_else(|| format_err("missing dimension".into()))
}

fn parse_values(record: &StringRecord) -> Option<Vec<f32>> {
    let values = record
        .iter()
        .skip(1)
        .map(|f| f.parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()?;
    (!values.is_empty()).then_some(values)
}

/// Parses a catalog record. Files written before the versioned header existed
/// may begin with a column-title row, which is skipped.
pub fn parse_record<R: Read>(mut reader: R) -> Result<ParsedRecord> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let ends_with_newline = bytes.last().is_none_or(|&b| b == b'\n');

    // Leading blank lines and the header are consumed here; the CSV reader
    // numbers lines from the start of the body.
    let mut dimension = None;
    let mut has_header = false;
    let mut body_start = 0;
    let mut line_offset = 0;
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        if line.trim_ascii().is_empty() {
            body_start += line.len();
            line_offset += 1;
            continue;
        }
        if line.starts_with(HEADER_PREFIX.as_bytes()) {
            dimension = Some(parse_header(line.trim_ascii(), line_offset + 1)?);
            has_header = true;
            body_start += line.len();
            line_offset += 1;
        }
        break;
    }

    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(&bytes[body_start..]);

    let mut entries = Vec::new();
    let mut first = true;

    for result in csv_reader.records() {
        let record = result.map_err(|e| ForensicsError::CatalogFormat {
            line: line_offset + e.position().map_or(1, |p| p.line() as usize),
            reason: e.to_string(),
        })?;
        let line_no = line_offset + record.position().map_or(1, |p| p.line() as usize);

        if record.iter().all(str::is_empty) {
            continue;
        }

        let label = &record[0];
        if label.starts_with(HEADER_PREFIX) {
            return Err(ForensicsError::CatalogFormat {
                line: line_no,
                reason: "header must be the first line".into(),
            });
        }

        let Some(values) = parse_values(&record) else {
            if first && !has_header {
                first = false;
                continue;
            }
            return Err(ForensicsError::CatalogFormat {
                line: line_no,
                reason: "embedding values must be finite numbers".into(),
            });
        };
        first = false;

        match dimension {
            Some(dim) if dim != values.len() => {
                return Err(ForensicsError::CatalogFormat {
                    line: line_no,
                    reason: format!("expected {dim} values, found {}", values.len()),
                });
            }
            Some(_) => {}
            None => dimension = Some(values.len()),
        }

        entries.push(CatalogEntry {
            label: label.to_string(),
            embedding: Embedding::new(values),
        });
    }

    Ok(ParsedRecord {
        dimension,
        entries,
        has_header,
        ends_with_newline,
    })
}

/// Append handle on the durable record. Each entry is one CSV row, flushed to
/// the file as a whole before `append` returns.
pub struct RecordWriter {
    writer: csv::Writer<File>,
}

impl RecordWriter {
    pub fn create<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        let mut file = OpenOptions::new().create_new(true).append(true).open(path)?;
        file.write_all(format!("{}\n", format_header(dimension)).as_bytes())?;
        file.flush()?;
        Ok(Self::wrap(file))
    }

    pub fn open_existing<P: AsRef<Path>>(path: P, ends_with_newline: bool) -> Result<Self> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        if !ends_with_newline {
            file.write_all(b"\n")?;
        }
        Ok(Self::wrap(file))
    }

    fn wrap(file: File) -> Self {
        let writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);
        Self { writer }
    }

    pub fn append(&mut self, label: &str, embedding: &Embedding) -> Result<()> {
        let mut fields = Vec::with_capacity(embedding.dim() + 1);
        fields.push(label.to_string());
        fields.extend(embedding.as_slice().iter().map(|v| format!(" {v}")));

        self.writer.write_record(&fields)?;
        self.writer.flush()?;
        Ok(())
    }
}
