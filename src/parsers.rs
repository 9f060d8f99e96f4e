//! Document parsers.
//!
//! Spec out-of-scope note: format-specific parsing (DOCX/CSV/JSON) beyond
//! the contract it must satisfy is an external collaborator's job. This
//! module only implements that contract — `ParsedDocument { text, tables }`
//! — plus the handful of formats cheap enough to parse without a heavy
//! external dependency (plain text, Markdown, CSV, JSON). Anything else
//! (DOCX, PDF, ...) is a `Fatal` "unsupported extension" error, matching
//! spec §7's "unsupported file extension" case.

use crate::error::{EngineError, Result};
use crate::models::Table;

/// What a parser hands back to the ingest orchestrator: the document's
/// plain text (fed to the analyzer/chunker) plus any tables it found
/// with known position already resolved (byte offsets into `text`,
/// converted to char offsets by the caller).
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub text: String,
    pub tables: Vec<Table>,
}

pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument>;
}

struct PlainTextParser;
impl DocumentParser for PlainTextParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument> {
        let text = decode(bytes)?;
        Ok(ParsedDocument { text, tables: Vec::new() })
    }
}

/// Markdown pipe-tables are detected and lifted into [`Table`]s; the rest
/// of the document passes through untouched as plain text.
struct MarkdownParser;
impl DocumentParser for MarkdownParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument> {
        let text = decode(bytes)?;
        let tables = extract_markdown_tables(&text);
        Ok(ParsedDocument { text, tables })
    }
}

fn extract_markdown_tables(text: &str) -> Vec<Table> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;
    let mut char_offset = 0usize;
    let mut line_starts = Vec::with_capacity(lines.len());
    for line in &lines {
        line_starts.push(char_offset);
        char_offset += line.chars().count() + 1;
    }

    while i < lines.len() {
        let line = lines[i].trim();
        if is_pipe_row(line) && i + 1 < lines.len() && is_separator_row(lines[i + 1].trim()) {
            let headers = split_pipe_row(line);
            let start_pos = line_starts[i];
            let mut row_idx = i + 2;
            let mut rows = Vec::new();
            while row_idx < lines.len() && is_pipe_row(lines[row_idx].trim()) {
                rows.push(split_pipe_row(lines[row_idx].trim()));
                row_idx += 1;
            }
            let end_pos = if row_idx < lines.len() {
                line_starts[row_idx]
            } else {
                char_offset
            };
            tables.push(Table { headers, rows, context_before: String::new(), context_after: String::new(), start_pos, end_pos });
            i = row_idx;
        } else {
            i += 1;
        }
    }
    tables
}

fn is_pipe_row(line: &str) -> bool {
    line.starts_with('|') && line.ends_with('|') && line.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    is_pipe_row(line) && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_pipe_row(line: &str) -> Vec<String> {
    line.trim_matches('|').split('|').map(|c| c.trim().to_string()).collect()
}

/// A `.csv` file is treated as a single document-wide [`Table`] with no
/// surrounding prose.
struct CsvParser;
impl DocumentParser for CsvParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument> {
        let text = decode(bytes)?;
        let mut lines = text.lines();
        let headers = lines
            .next()
            .map(|l| l.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<Vec<String>> = lines
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split(',').map(|c| c.trim().to_string()).collect())
            .collect();
        let end_pos = text.chars().count();
        let table = Table { headers, rows, context_before: String::new(), context_after: String::new(), start_pos: 0, end_pos };
        Ok(ParsedDocument { text, tables: vec![table] })
    }
}

/// A `.json` file is pretty-printed back into text so the analyzer and
/// chunker can operate on it like any other document; it produces no
/// [`Table`]s of its own.
struct JsonParser;
impl DocumentParser for JsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument> {
        let raw = decode(bytes)?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Fatal(format!("invalid JSON document: {e}")))?;
        let text = serde_json::to_string_pretty(&value)
            .map_err(|e| EngineError::Fatal(format!("failed to render JSON document: {e}")))?;
        Ok(ParsedDocument { text, tables: Vec::new() })
    }
}

fn decode(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(EngineError::Fatal("empty document body".into()));
    }
    String::from_utf8(bytes.to_vec()).map_err(|e| EngineError::Fatal(format!("non-UTF-8 document body: {e}")))
}

/// Select a parser by file extension, per spec §4.11 step 1. Unsupported
/// extensions fail fast rather than falling back to a best-effort parse.
pub fn parser_for_extension(extension: &str) -> Result<Box<dyn DocumentParser>> {
    match extension.to_lowercase().as_str() {
        "txt" => Ok(Box::new(PlainTextParser)),
        "md" | "markdown" => Ok(Box::new(MarkdownParser)),
        "csv" => Ok(Box::new(CsvParser)),
        "json" => Ok(Box::new(JsonParser)),
        other => Err(EngineError::Fatal(format!("unsupported file extension: .{other}"))),
    }
}

pub fn extension_of(file_path: &str) -> Option<String> {
    std::path::Path::new(file_path).extension().map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_fatal() {
        let result = parser_for_extension("docx");
        assert!(matches!(result, Err(EngineError::Fatal(_))));
    }

    #[test]
    fn plain_text_yields_no_tables() {
        let parser = parser_for_extension("txt").unwrap();
        let parsed = parser.parse("просто текст документа".as_bytes()).unwrap();
        assert!(parsed.tables.is_empty());
    }

    #[test]
    fn empty_body_is_fatal() {
        let parser = parser_for_extension("txt").unwrap();
        assert!(parser.parse(&[]).is_err());
    }

    #[test]
    fn csv_yields_single_table() {
        let parser = parser_for_extension("csv").unwrap();
        let parsed = parser.parse("Имя,Должность\nИванов,Копирайтер\n".as_bytes()).unwrap();
        assert_eq!(parsed.tables.len(), 1);
        assert_eq!(parsed.tables[0].headers, vec!["Имя", "Должность"]);
    }

    #[test]
    fn markdown_table_is_extracted() {
        let parser = parser_for_extension("md").unwrap();
        let text = "Заголовок\n\n| Имя | Должность |\n| --- | --- |\n| Иванов | Копирайтер |\n\nХвост";
        let parsed = parser.parse(text.as_bytes()).unwrap();
        assert_eq!(parsed.tables.len(), 1);
        assert_eq!(parsed.tables[0].rows, vec![vec!["Иванов".to_string(), "Копирайтер".to_string()]]);
    }

    #[test]
    fn json_is_pretty_printed() {
        let parser = parser_for_extension("json").unwrap();
        let parsed = parser.parse(r#"{"a":1}"#.as_bytes()).unwrap();
        assert!(parsed.text.contains('\n'));
    }

    #[test]
    fn extension_of_strips_dot() {
        assert_eq!(extension_of("report.TXT"), Some("txt".to_string()));
        assert_eq!(extension_of("no_extension"), None);
    }
}
