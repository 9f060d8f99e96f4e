//! Semantic chunker (C10).
//!
//! Walks the sections produced by [`crate::analyzer`], deciding per
//! section whether to emit it whole, split it on semantic boundaries,
//! or delegate it (in part) to the table row-chunker (C9) when a
//! [`Table`] falls inside its span. Every chunk keeps its absolute
//! character offsets into the original document text.
//!
//! Grounded on
//! `original_source/worker/services/chunking_service.py`'s
//! `SemanticChunkingService` (`_process_section`,
//! `_split_section_into_chunks`, `_find_semantic_boundary`,
//! `_process_section_with_tables`).

use chrono::Utc;

use crate::analyzer::{self, DocumentMetadata};
use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, Section, SectionType, Table};
use crate::table;

const ABBREVIATIONS: &[&str] = &["т.д", "т.п", "и.о", "г.", "см.", "стр.", "п.", "пп."];
const SENTENCE_SEARCH_RANGE: usize = 100;
const NUMBERED_ITEM_SEARCH_RANGE: usize = 150;

/// One fully-located table: its parsed contents plus where it sits in
/// the document's char-offset space, so the chunker can splice its
/// rows into the surrounding section.
pub struct LocatedTable {
    pub table: Table,
    pub title: String,
}

/// Chunk a whole document. `tables`, if any, must already have
/// `start_pos`/`end_pos` set in absolute document-char coordinates
/// (via [`crate::table::locate_table_context`] applied beforehand).
pub fn chunk_document(
    text: &str,
    document_id: &str,
    access_level: i32,
    sections: &[Section],
    tables: &[LocatedTable],
    document_metadata: &DocumentMetadata,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in sections {
        let section_tables: Vec<&LocatedTable> = tables
            .iter()
            .filter(|lt| lt.table.start_pos >= section.start_pos && lt.table.start_pos <= section.end_pos)
            .collect();

        if section_tables.is_empty() {
            chunks.extend(process_section(section, config));
        } else {
            chunks.extend(process_section_with_tables(section, &section_tables, document_id, access_level, config));
        }
    }

    finalize_chunks(chunks, document_id, access_level, document_metadata)
}

fn process_section(section: &Section, config: &ChunkingConfig) -> Vec<PartialChunk> {
    if analyzer::should_keep_together(section, config.min_size) {
        return vec![PartialChunk::whole_section(section)];
    }
    split_section(section, analyzer::optimal_chunk_size(section, config), config)
}

fn split_section(section: &Section, chunk_size: usize, config: &ChunkingConfig) -> Vec<PartialChunk> {
    let chars: Vec<char> = section.content.chars().collect();
    if chars.len() <= chunk_size {
        return vec![PartialChunk::whole_section(section)];
    }

    let mut parts = Vec::new();
    let mut current_pos = 0usize;
    let mut part_number = 1usize;

    while current_pos < chars.len() {
        let mut end_pos = (current_pos + chunk_size).min(chars.len());
        if end_pos < chars.len() {
            end_pos = find_semantic_boundary(&chars, end_pos, section.section_type);
        }

        let raw: String = chars[current_pos..end_pos].iter().collect();
        let trimmed = raw.trim();

        if !trimmed.is_empty() && trimmed.chars().count() >= config.min_size {
            let prefixed = if part_number == 1 {
                format!("[{}]\n{}", section.title, trimmed)
            } else {
                format!("[{} (продолжение)]\n{}", section.title, trimmed)
            };
            parts.push(PartialChunk {
                text: prefixed,
                char_start: section.start_pos + current_pos,
                char_end: section.start_pos + end_pos,
                section_title: section.title.clone(),
                section_type: section.section_type,
                section_level: section.level,
                chunk_type: ChunkType::SectionPart,
                is_complete_section: false,
                table_metadata: None,
            });
            part_number += 1;
        }

        if end_pos >= chars.len() {
            break;
        }
        current_pos = (current_pos + 1).max(end_pos.saturating_sub(config.overlap));
    }

    if parts.is_empty() {
        return vec![PartialChunk::whole_section(section)];
    }
    parts
}

/// Find a semantic cut point at or before `position`: for numbered
/// items, prefer the boundary between list items; otherwise fall back
/// to a sentence boundary.
fn find_semantic_boundary(chars: &[char], position: usize, section_type: SectionType) -> usize {
    if section_type == SectionType::NumberedItem {
        let search_range = NUMBERED_ITEM_SEARCH_RANGE.min(position);
        let floor = position.saturating_sub(search_range);
        let mut i = position;
        while i > floor {
            if i > 0 && chars[i - 1] == '.' && chars.get(i) == Some(&'\n') {
                let mut next = i + 1;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                if next < chars.len() {
                    let lookahead: String = chars[next..(next + 10).min(chars.len())].iter().collect();
                    if lookahead.chars().next().is_some_and(|c| c.is_ascii_digit())
                        && lookahead.contains('.')
                    {
                        return i + 1;
                    }
                }
            }
            i -= 1;
        }
    }
    find_sentence_boundary(chars, position)
}

fn find_sentence_boundary(chars: &[char], position: usize) -> usize {
    let search_range = SENTENCE_SEARCH_RANGE.min(position);
    let floor = position.saturating_sub(search_range);

    let mut i = position;
    while i > floor {
        let ch = chars[i];
        if matches!(ch, '.' | '!' | '?') {
            if i + 1 < chars.len() && chars[i + 1].is_whitespace() && !is_abbreviation(chars, i) {
                return i + 1;
            }
        } else if ch == '\n' {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_uppercase() || next.is_ascii_digit() {
                    return i + 1;
                }
            }
        }
        i -= 1;
    }

    let mut i = position;
    while i > floor {
        if chars[i].is_whitespace() {
            return i;
        }
        i -= 1;
    }
    position
}

fn is_abbreviation(chars: &[char], position: usize) -> bool {
    if position < 2 {
        return false;
    }
    let start = position.saturating_sub(5);
    let end = (position + 3).min(chars.len());
    let context: String = chars[start..end].iter().collect::<String>().to_lowercase();
    ABBREVIATIONS.iter().any(|abbr| context.contains(abbr))
}

fn process_section_with_tables(
    section: &Section,
    section_tables: &[&LocatedTable],
    document_id: &str,
    access_level: i32,
    config: &ChunkingConfig,
) -> Vec<PartialChunk> {
    let mut sorted_tables: Vec<&&LocatedTable> = section_tables.iter().collect();
    sorted_tables.sort_by_key(|lt| lt.table.start_pos);

    let chars: Vec<char> = section.content.chars().collect();
    let mut parts = Vec::new();
    let mut current_pos = 0usize;

    for lt in sorted_tables {
        let relative_pos = lt.table.start_pos.saturating_sub(section.start_pos);
        let relative_pos = relative_pos.min(chars.len());

        if relative_pos > current_pos {
            let before: String = chars[current_pos..relative_pos].iter().collect::<String>().trim().to_string();
            if before.chars().count() >= config.min_size {
                parts.push(PartialChunk {
                    text: before,
                    char_start: section.start_pos + current_pos,
                    char_end: section.start_pos + relative_pos,
                    section_title: section.title.clone(),
                    section_type: section.section_type,
                    section_level: section.level,
                    chunk_type: ChunkType::TextBeforeTable,
                    is_complete_section: false,
                    table_metadata: None,
                });
            }
        }

        let table_chunks = table::create_table_chunks(&lt.table, document_id, access_level, &lt.title);
        if table_chunks.is_empty() {
            let fallback = table::create_fallback_chunk(&lt.table, document_id, access_level, &lt.title);
            parts.push(PartialChunk::from_table_chunk(fallback));
        } else {
            for tc in table_chunks {
                parts.push(PartialChunk::from_table_chunk(tc));
            }
        }

        let table_len = lt.table.end_pos.saturating_sub(lt.table.start_pos);
        current_pos = (relative_pos + table_len).min(chars.len());
    }

    if current_pos < chars.len() {
        let after: String = chars[current_pos..].iter().collect::<String>().trim().to_string();
        if after.chars().count() >= config.min_size {
            parts.push(PartialChunk {
                text: after,
                char_start: section.start_pos + current_pos,
                char_end: section.end_pos,
                section_title: section.title.clone(),
                section_type: section.section_type,
                section_level: section.level,
                chunk_type: ChunkType::TextAfterTable,
                is_complete_section: false,
                table_metadata: None,
            });
        }
    }

    parts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkType {
    CompleteSection,
    SectionPart,
    TextBeforeTable,
    TextAfterTable,
    TableRowPreformatted,
}

impl ChunkType {
    fn as_str(self) -> &'static str {
        match self {
            ChunkType::CompleteSection => "complete_section",
            ChunkType::SectionPart => "section_part",
            ChunkType::TextBeforeTable => "text_before_table",
            ChunkType::TextAfterTable => "text_after_table",
            ChunkType::TableRowPreformatted => "table_row",
        }
    }
}

struct PartialChunk {
    text: String,
    char_start: usize,
    char_end: usize,
    section_title: String,
    section_type: SectionType,
    section_level: u8,
    chunk_type: ChunkType,
    is_complete_section: bool,
    /// Set only for table row chunks: the rich per-row metadata C9
    /// already built, merged on top of the generic fields at
    /// finalization instead of being recomputed.
    table_metadata: Option<ChunkMetadata>,
}

impl PartialChunk {
    fn whole_section(section: &Section) -> Self {
        Self {
            text: section.content.clone(),
            char_start: section.start_pos,
            char_end: section.end_pos,
            section_title: section.title.clone(),
            section_type: section.section_type,
            section_level: section.level,
            chunk_type: ChunkType::CompleteSection,
            is_complete_section: true,
            table_metadata: None,
        }
    }

    /// Table row chunks already carry their own rich metadata (C9); we
    /// keep the text and offsets and mark the type, and let
    /// `finalize_chunks` re-merge the table-specific metadata back in.
    fn from_table_chunk(chunk: Chunk) -> Self {
        let section_title = chunk.metadata.get_str("section_title").unwrap_or_default().to_string();
        Self {
            text: chunk.text,
            char_start: chunk.char_start,
            char_end: chunk.char_end,
            section_title,
            section_type: SectionType::TableRow,
            section_level: 1,
            chunk_type: ChunkType::TableRowPreformatted,
            is_complete_section: false,
            table_metadata: Some(chunk.metadata),
        }
    }
}

fn finalize_chunks(
    parts: Vec<PartialChunk>,
    document_id: &str,
    access_level: i32,
    document_metadata: &DocumentMetadata,
) -> Vec<Chunk> {
    let total = parts.len();
    let created_at = Utc::now().to_rfc3339();
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let mut metadata = ChunkMetadata::new();
            metadata.set("document_id", document_id);
            metadata.set("chunk_index", i as i64);
            metadata.set("access_level", access_level as i64);
            metadata.set("created_at", created_at.clone());
            metadata.set("char_count", part.text.chars().count() as i64);
            metadata.set("total_chunks", total as i64);
            metadata.set("section_title", part.section_title.clone());
            metadata.set("section_type", part.section_type.to_string());
            metadata.set("section_level", part.section_level as i64);
            metadata.set("chunk_type", part.chunk_type.as_str());
            metadata.set("is_complete_section", part.is_complete_section);
            metadata.set("document_type", document_metadata.document_type.to_string());
            if let Some(title) = &document_metadata.title {
                metadata.set("document_title", title.clone());
            }
            if let Some(number) = &document_metadata.number {
                metadata.set("document_number", number.clone());
            }
            if let Some(date) = &document_metadata.date {
                metadata.set("document_date", date.clone());
            }
            if let Some(org) = &document_metadata.organization {
                metadata.set("document_organization", org.clone());
            }
            if let Some(table_metadata) = part.table_metadata {
                metadata.merge(table_metadata);
            }

            Chunk {
                document_id: document_id.to_string(),
                chunk_index: i as i64,
                text: part.text,
                access_level,
                char_start: part.char_start,
                char_end: part.char_end,
                metadata,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            size: 100,
            overlap: 20,
            min_size: 10,
            header_size: 50,
            numbered_item_size: 60,
            signatures_size: 30,
            table_size: 150,
        }
    }

    fn doc_metadata() -> DocumentMetadata {
        DocumentMetadata { document_type: crate::models::DocumentType::General, ..Default::default() }
    }

    #[test]
    fn short_section_emits_single_chunk() {
        let section = Section {
            title: "Вступление".to_string(),
            content: "Короткий текст секции.".to_string(),
            level: 1,
            section_type: SectionType::Paragraph,
            start_pos: 0,
            end_pos: 22,
        };
        let chunks = chunk_document("doc text", "doc1", 10, &[section], &[], &doc_metadata(), &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.get_str("chunk_type"), Some("complete_section"));
    }

    #[test]
    fn long_paragraph_splits_with_overlap_and_prefix() {
        let content = "Предложение номер один. ".repeat(30);
        let end = content.chars().count();
        let section = Section {
            title: "Основной раздел".to_string(),
            content,
            level: 1,
            section_type: SectionType::Paragraph,
            start_pos: 0,
            end_pos: end,
        };
        let chunks = chunk_document("doc text", "doc1", 10, &[section], &[], &doc_metadata(), &config());
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("[Основной раздел]"));
        assert!(chunks[1].text.contains("(продолжение)"));
    }

    #[test]
    fn chunk_offsets_stay_within_document_bounds() {
        let content = "Предложение номер один. ".repeat(20);
        let end = content.chars().count();
        let section = Section {
            title: "Раздел".to_string(),
            content,
            level: 1,
            section_type: SectionType::Paragraph,
            start_pos: 5,
            end_pos: end + 5,
        };
        let chunks = chunk_document("doc text", "doc1", 10, &[section], &[], &doc_metadata(), &config());
        for chunk in &chunks {
            assert!(chunk.char_start >= 5);
            assert!(chunk.char_end <= end + 5);
        }
    }

    #[test]
    fn header_section_kept_whole() {
        let section = Section {
            title: "ОБЩИЕ ПОЛОЖЕНИЯ".to_string(),
            content: "ОБЩИЕ ПОЛОЖЕНИЯ".to_string(),
            level: 1,
            section_type: SectionType::Header,
            start_pos: 0,
            end_pos: 15,
        };
        let chunks = chunk_document("doc text", "doc1", 10, &[section], &[], &doc_metadata(), &config());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.get_str("is_complete_section").is_some());
    }

    #[test]
    fn total_chunks_metadata_matches_actual_count() {
        let content = "Предложение номер один. ".repeat(30);
        let end = content.chars().count();
        let section = Section {
            title: "Основной раздел".to_string(),
            content,
            level: 1,
            section_type: SectionType::Paragraph,
            start_pos: 0,
            end_pos: end,
        };
        let chunks = chunk_document("doc text", "doc1", 10, &[section], &[], &doc_metadata(), &config());
        let total = chunks.len() as i64;
        for chunk in &chunks {
            assert_eq!(chunk.metadata.get_i64("total_chunks"), Some(total));
        }
    }
}
