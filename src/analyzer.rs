//! Document analyzer (C8).
//!
//! Classifies a document's type from its content, extracts structured
//! metadata (order number, date, organization, legal identifiers,
//! signatories, addresses), and splits the raw text into a sequence of
//! [`Section`]s a [`crate::chunker`] pass can then chunk adaptively.
//!
//! Grounded on
//! `original_source/worker/services/document_analyzer.py`'s
//! `DocumentStructureAnalyzer` — patterns and classification order are
//! carried over verbatim.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{DocumentType, Section, SectionType};

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub document_type: DocumentType,
    pub title: Option<String>,
    pub number: Option<String>,
    pub date: Option<String>,
    pub organization: Option<String>,
    pub signatories: Vec<String>,
    pub inn: Option<String>,
    pub ogrn: Option<String>,
    pub kpp: Option<String>,
    pub addresses: Vec<String>,
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::General
    }
}

macro_rules! lazy_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

lazy_re!(order_primary_re, r"ПРИКАЗ");
lazy_re!(order_spaced_re, r"П\s*Р\s*И\s*К\s*А\s*З");
lazy_re!(order_number_from_re, r"№\s*\d+[-\w]*\s*от");
lazy_re!(order_directive_re, r"ПРИКАЗЫВАЮ");
lazy_re!(instruction_re, r"ИНСТРУКЦИЯ");
lazy_re!(job_instruction_re, r"ДОЛЖНОСТНАЯ\s+ИНСТРУКЦИЯ");
lazy_re!(regulation_re, r"РЕГЛАМЕНТ");
lazy_re!(contract_re, r"ДОГОВОР");
lazy_re!(agreement_re, r"СОГЛАШЕНИЕ");
lazy_re!(contract_alt_re, r"КОНТРАКТ");

lazy_re!(order_number_re, r"№\s*(\d+[-\w]*)");
lazy_re!(date_re, r"«(\d{1,2})»\s+(\w+)\s+(\d{4})\s*г\.?");
lazy_re!(organization_re, r#"(?:ООО|ОАО|ЗАО|ИП)\s*[«"]?([^«"»\n]+)[«"»]?"#);
lazy_re!(inn_re, r"ИНН\s*(\d{10,12})");
lazy_re!(ogrn_re, r"ОГРН\s*(\d{13,15})");
lazy_re!(kpp_re, r"КПП\s*(\d{9})");
lazy_re!(
    signatory_re,
    r"(?:Директор|Генеральный\s+директор|Руководитель)[^\n]*\s+([А-ЯЁ][а-яё]+\s+[А-ЯЁ]\.[А-ЯЁ]\.)"
);
lazy_re!(address_re, r"(?:Юридический\s+адрес|Фактический\s+адрес):\s*([^\n]+)");

lazy_re!(numbered_item_re, r"^(\d+(?:\.\d+)*)\.\s*(.+)");
lazy_re!(lettered_item_re, r"^([а-я])\)\s*(.+)");
lazy_re!(header_re, r"^([А-ЯЁ\s]{3,}):?\s*$");
lazy_re!(subheader_re, r"^([А-ЯЁ][а-яё\s]+):?\s*$");
lazy_re!(table_start_re, r"^\[Заголовки таблицы:");

fn heading_noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d").unwrap())
}

pub fn detect_document_type(text: &str) -> DocumentType {
    let upper = text.to_uppercase();
    if order_primary_re().is_match(&upper)
        || order_spaced_re().is_match(&upper)
        || order_number_from_re().is_match(&upper)
        || order_directive_re().is_match(&upper)
    {
        return DocumentType::Order;
    }
    if instruction_re().is_match(&upper) || job_instruction_re().is_match(&upper) || regulation_re().is_match(&upper)
    {
        return DocumentType::Instruction;
    }
    if contract_re().is_match(&upper) || agreement_re().is_match(&upper) || contract_alt_re().is_match(&upper) {
        return DocumentType::Contract;
    }
    DocumentType::General
}

pub fn extract_metadata(text: &str, document_type: DocumentType) -> DocumentMetadata {
    let mut metadata = DocumentMetadata { document_type, ..Default::default() };

    if let Some(caps) = order_number_re().captures(text) {
        metadata.number = Some(caps[1].to_string());
    }
    if let Some(caps) = date_re().captures(text) {
        metadata.date = Some(format!("{} {} {}", &caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = organization_re().captures(text) {
        metadata.organization = Some(caps[1].trim().to_string());
    }
    for caps in signatory_re().captures_iter(text) {
        metadata.signatories.push(caps[1].trim().to_string());
    }
    metadata.inn = inn_re().captures(text).map(|c| c[1].to_string());
    metadata.ogrn = ogrn_re().captures(text).map(|c| c[1].to_string());
    metadata.kpp = kpp_re().captures(text).map(|c| c[1].to_string());
    for caps in address_re().captures_iter(text) {
        metadata.addresses.push(caps[1].trim().to_string());
    }

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_uppercase();
        let is_boilerplate = ["ООО", "ИНН", "АДРЕС", "ОГРН"].iter().any(|kw| upper.contains(kw));
        if !is_boilerplate && line.chars().count() > 10 && !heading_noise_re().is_match(line) {
            metadata.title = Some(line.to_string());
            break;
        }
    }

    metadata
}

struct LineClassification {
    is_header: bool,
    title: String,
    level: u8,
    section_type: SectionType,
}

fn classify_line(line: &str, document_type: DocumentType) -> LineClassification {
    if let Some(caps) = numbered_item_re().captures(line) {
        let number = &caps[1];
        let level = number.split('.').count().min(u8::MAX as usize) as u8;
        return LineClassification {
            is_header: true,
            title: format!("Пункт {number}"),
            level,
            section_type: SectionType::NumberedItem,
        };
    }
    if let Some(caps) = lettered_item_re().captures(line) {
        let letter = &caps[1];
        return LineClassification {
            is_header: true,
            title: format!("Подпункт {letter})"),
            level: 3,
            section_type: SectionType::LetteredItem,
        };
    }
    if header_re().is_match(line) {
        return LineClassification {
            is_header: true,
            title: line.to_string(),
            level: 1,
            section_type: SectionType::Header,
        };
    }
    if subheader_re().is_match(line) && line.chars().count() < 100 {
        return LineClassification {
            is_header: true,
            title: line.to_string(),
            level: 2,
            section_type: SectionType::Header,
        };
    }
    if table_start_re().is_match(line) {
        let title = if let Some((before, _)) = line.split_once(':') {
            before.replace("[Заголовки таблицы", "").trim().to_string()
        } else {
            "Таблица".to_string()
        };
        return LineClassification { is_header: true, title, level: 1, section_type: SectionType::Table };
    }
    if document_type == DocumentType::Order {
        if line.to_uppercase().contains("ПРИКАЗЫВАЮ") {
            return LineClassification {
                is_header: true,
                title: "Распорядительная часть".to_string(),
                level: 1,
                section_type: SectionType::OrderDirective,
            };
        }
        if line.starts_with("Директор") || line.starts_with("Генеральный директор") {
            return LineClassification {
                is_header: true,
                title: "Подписи".to_string(),
                level: 1,
                section_type: SectionType::Signatures,
            };
        }
    }

    LineClassification { is_header: false, title: line.to_string(), level: 1, section_type: SectionType::Paragraph }
}

/// Split `text` into structurally meaningful sections. Falls back to a
/// single whole-document `Paragraph` section when no structural marker
/// is ever recognized, matching the Python analyzer's no-sections case.
pub fn analyze_structure(text: &str, document_type: DocumentType) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    let mut current_content: Vec<String> = Vec::new();
    let mut offset = 0usize;
    let mut line_starts = Vec::with_capacity(lines.len());
    for line in &lines {
        line_starts.push(offset);
        offset += line.chars().count() + 1;
    }

    for (i, raw_line) in lines.iter().enumerate() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            if !current_content.is_empty() {
                current_content.push(String::new());
            }
            continue;
        }

        let classification = classify_line(trimmed, document_type);
        if classification.is_header {
            if let Some(mut section) = current.take() {
                if !current_content.is_empty() {
                    section.content = current_content.join("\n").trim().to_string();
                    sections.push(section);
                }
            }
            let start_pos = line_starts[i];
            current = Some(Section {
                title: classification.title,
                content: String::new(),
                level: classification.level,
                section_type: classification.section_type,
                start_pos,
                end_pos: start_pos + raw_line.chars().count(),
            });
            current_content = vec![trimmed.to_string()];
        } else if current.is_some() || !trimmed.is_empty() {
            current_content.push(trimmed.to_string());
        }
    }

    if let Some(mut section) = current {
        if !current_content.is_empty() {
            section.content = current_content.join("\n").trim().to_string();
            section.end_pos = text.chars().count();
            sections.push(section);
        }
    }

    if sections.is_empty() {
        sections.push(Section {
            title: "Документ".to_string(),
            content: text.trim().to_string(),
            level: 1,
            section_type: SectionType::Paragraph,
            start_pos: 0,
            end_pos: text.chars().count(),
        });
    }

    sections
}

/// Adaptive target chunk size for a section, in characters. Used by
/// the chunker to decide how aggressively to split a section that
/// isn't kept whole.
pub fn optimal_chunk_size(section: &Section, config: &crate::config::ChunkingConfig) -> usize {
    match section.section_type {
        SectionType::Header => config.header_size.min(section.content.chars().count() + 100),
        SectionType::NumberedItem => {
            let len = section.content.chars().count();
            if len < 300 {
                len + 50
            } else if len < 800 {
                config.numbered_item_size
            } else {
                config.size
            }
        }
        SectionType::Signatures => config.signatures_size.min(section.content.chars().count() + 50),
        SectionType::Table => config.table_size.min(section.content.chars().count() + 200),
        _ => config.size,
    }
}

/// Whether `section` should be emitted as a single chunk rather than
/// split. Tables are the deliberate exception: row-based chunking
/// (C9) handles them instead of the generic splitter.
pub fn should_keep_together(section: &Section, min_size: usize) -> bool {
    if section.content.chars().count() < min_size {
        return true;
    }
    match section.section_type {
        SectionType::Header | SectionType::Signatures | SectionType::LetteredItem => true,
        SectionType::Table => false,
        SectionType::NumberedItem => section.content.chars().count() < 500,
        _ => false,
    }
}

pub fn analyze_document(text: &str) -> (DocumentMetadata, Vec<Section>) {
    let document_type = detect_document_type(text);
    let metadata = extract_metadata(text, document_type);
    let sections = analyze_structure(text, document_type);
    (metadata, sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_order_document() {
        let text = "ПРИКАЗ №15-к от 01.02.2024\nПРИКАЗЫВАЮ:\n1. Назначить.";
        assert_eq!(detect_document_type(text), DocumentType::Order);
    }

    #[test]
    fn detects_instruction_document() {
        let text = "ДОЛЖНОСТНАЯ ИНСТРУКЦИЯ копирайтера";
        assert_eq!(detect_document_type(text), DocumentType::Instruction);
    }

    #[test]
    fn detects_contract_document() {
        let text = "ДОГОВОР оказания услуг № 10";
        assert_eq!(detect_document_type(text), DocumentType::Contract);
    }

    #[test]
    fn falls_back_to_general() {
        let text = "Обычный текстовый файл без маркеров структуры документа.";
        assert_eq!(detect_document_type(text), DocumentType::General);
    }

    #[test]
    fn extracts_order_number_and_legal_info() {
        let text = "ПРИКАЗ №15-к от 01.02.2024\nООО «Ромашка»\nИНН 7701234567\nОГРН 1027700132195\nКПП 770101001";
        let metadata = extract_metadata(text, DocumentType::Order);
        assert_eq!(metadata.number.as_deref(), Some("15-к"));
        assert_eq!(metadata.inn.as_deref(), Some("7701234567"));
        assert_eq!(metadata.ogrn.as_deref(), Some("1027700132195"));
        assert_eq!(metadata.kpp.as_deref(), Some("770101001"));
    }

    #[test]
    fn splits_numbered_items_into_sections() {
        let text = "ПРИКАЗЫВАЮ:\n1. Назначить ответственного.\n2. Утвердить регламент.";
        let sections = analyze_structure(text, DocumentType::Order);
        assert!(sections.iter().any(|s| s.section_type == SectionType::OrderDirective));
        assert!(sections.iter().any(|s| s.section_type == SectionType::NumberedItem));
    }

    #[test]
    fn no_structural_markers_yields_single_paragraph_section() {
        let sections = analyze_structure("просто текст без разметки", DocumentType::General);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section_type, SectionType::Paragraph);
    }
}
