//! Table processor (C9).
//!
//! Row-based chunking: every data row becomes its own chunk, each
//! carrying the full table context (surrounding document text, title,
//! and column headers) so a row is retrievable on its own without
//! losing what its columns mean. `search_weight=2.0` lets the retriever
//! favor structured-data chunks over ordinary prose.
//!
//! Grounded on `original_source/worker/services/table_processor.py`'s
//! `_create_row_based_chunks`, the "best practices" path the service
//! settled on (the whole-table and fixed-row-group chunk builders in
//! that file are earlier, superseded approaches and are not ported).

use crate::models::{Chunk, ChunkMetadata, SectionType, Table};

const CONTEXT_BEFORE_CHARS: usize = 200;
const CONTEXT_AFTER_CHARS: usize = 100;
const SEARCH_WEIGHT: f64 = 2.0;

/// Populate `context_before`/`context_after` on a [`Table`] from the
/// surrounding document text, and resolve its display title from the
/// last non-empty line before it.
pub fn locate_table_context(full_text: &str, table: &mut Table) {
    let chars: Vec<char> = full_text.chars().collect();
    let start = table.start_pos.min(chars.len());
    let end = table.end_pos.min(chars.len()).max(start);

    let before_start = start.saturating_sub(CONTEXT_BEFORE_CHARS);
    table.context_before = chars[before_start..start].iter().collect::<String>().trim().to_string();

    let after_end = (end + CONTEXT_AFTER_CHARS).min(chars.len());
    table.context_after = chars[end..after_end].iter().collect::<String>().trim().to_string();
}

pub fn find_table_title(context_before: &str) -> String {
    if context_before.is_empty() {
        return "Таблица".to_string();
    }
    for line in context_before.lines().rev() {
        let line = line.trim();
        if line.chars().count() > 3 && line.chars().count() < 150 {
            return line.trim_end_matches(':').trim().to_string();
        }
    }
    "Таблица".to_string()
}

/// Emit one chunk per non-empty data row. `access_level` is the
/// document's access level, inherited unchanged by every row chunk.
pub fn create_table_chunks(table: &Table, document_id: &str, access_level: i32, title: &str) -> Vec<Chunk> {
    let mut context_parts = Vec::new();
    if !table.context_before.is_empty() {
        context_parts.push(format!("Контекст документа: {}", table.context_before));
    }
    context_parts.push(format!("Таблица: {title}"));
    if !table.headers.is_empty() {
        context_parts.push(format!("Столбцы таблицы: {}", table.headers.join(" | ")));
    }
    let base_context = context_parts.join("\n");

    let mut chunks = Vec::new();
    for (row_idx, row) in table.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let row_line = if table.headers.len() == row.len() {
            let details: Vec<String> = table
                .headers
                .iter()
                .zip(row.iter())
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(header, value)| format!("{header}: {}", value.trim()))
                .collect();
            if details.is_empty() {
                continue;
            }
            format!("Строка {}: {}", row_idx + 1, details.join(" | "))
        } else {
            let values: Vec<&str> = row.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
            if values.is_empty() {
                continue;
            }
            format!("Строка {}: {}", row_idx + 1, values.join(" | "))
        };

        let mut text_parts = vec![base_context.clone(), row_line];
        if !table.context_after.is_empty() {
            text_parts.push(format!("Далее в документе: {}", table.context_after));
        }
        let text = text_parts.join("\n");
        let char_count = text.chars().count();

        let mut metadata = ChunkMetadata::new();
        metadata.set("section_title", title);
        metadata.set("section_type", SectionType::TableRow.to_string());
        metadata.set("chunk_type", "table_row");
        metadata.set("is_complete_section", false);
        metadata.set("table_title", title);
        metadata.set("table_headers", table.headers.clone());
        metadata.set("table_total_rows", table.row_count() as i64);
        metadata.set("table_total_cols", table.col_count() as i64);
        metadata.set("table_row_index", (row_idx + 1) as i64);
        metadata.set("table_row_data", row.clone());
        metadata.set("has_table_context", true);
        metadata.set("context_before", table.context_before.clone());
        metadata.set("context_after", table.context_after.clone());
        metadata.set("content_type", "structured_data");
        metadata.set("search_weight", SEARCH_WEIGHT);
        metadata.set("char_count", char_count as i64);
        metadata.set("access_level", access_level as i64);

        chunks.push(Chunk {
            document_id: document_id.to_string(),
            chunk_index: row_idx as i64,
            text,
            access_level,
            char_start: table.start_pos,
            char_end: table.end_pos,
            metadata,
        });
    }
    chunks
}

/// Single whole-table chunk used when row-based chunking yields
/// nothing usable (e.g. every row is empty).
pub fn create_fallback_chunk(table: &Table, document_id: &str, access_level: i32, title: &str) -> Chunk {
    let mut rows_text = String::new();
    for row in &table.rows {
        rows_text.push_str(&row.join(" | "));
        rows_text.push('\n');
    }
    let text = format!("{title}\n{}", rows_text.trim_end());

    let mut metadata = ChunkMetadata::new();
    metadata.set("section_title", title);
    metadata.set("section_type", SectionType::FallbackTable.to_string());
    metadata.set("chunk_type", "fallback_table");
    metadata.set("is_complete_section", true);
    metadata.set("access_level", access_level as i64);

    Chunk {
        document_id: document_id.to_string(),
        chunk_index: 0,
        text,
        access_level,
        char_start: table.start_pos,
        char_end: table.end_pos,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table {
            headers: vec!["Имя".to_string(), "Должность".to_string()],
            rows: vec![
                vec!["Иванов И.И.".to_string(), "Копирайтер".to_string()],
                vec!["".to_string(), "".to_string()],
                vec!["Петров П.П.".to_string(), "Редактор".to_string()],
            ],
            context_before: "Список сотрудников отдела".to_string(),
            context_after: "Утверждено приказом".to_string(),
            start_pos: 100,
            end_pos: 250,
        }
    }

    #[test]
    fn emits_one_chunk_per_nonempty_row() {
        let table = sample_table();
        let chunks = create_table_chunks(&table, "doc1", 10, "Сотрудники");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn skips_fully_empty_rows() {
        let table = sample_table();
        let chunks = create_table_chunks(&table, "doc1", 10, "Сотрудники");
        assert!(chunks.iter().all(|c| !c.text.contains("Строка 2:")));
    }

    #[test]
    fn row_chunk_carries_search_weight_and_headers() {
        let table = sample_table();
        let chunks = create_table_chunks(&table, "doc1", 10, "Сотрудники");
        let first = &chunks[0];
        assert_eq!(first.metadata.get_str("table_title"), Some("Сотрудники"));
        assert!(first.text.contains("Имя: Иванов И.И."));
    }

    #[test]
    fn title_falls_back_when_no_context() {
        assert_eq!(find_table_title(""), "Таблица");
    }

    #[test]
    fn title_picked_from_last_nonempty_line() {
        let context = "Некоторый текст\nСписок сотрудников:";
        assert_eq!(find_table_title(context), "Список сотрудников");
    }

    #[test]
    fn fallback_chunk_is_single_complete_section() {
        let table = sample_table();
        let chunk = create_fallback_chunk(&table, "doc1", 10, "Сотрудники");
        assert_eq!(chunk.metadata.get_str("chunk_type"), Some("fallback_table"));
    }
}
