//! Table formatting for query results and index summaries.

use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::ingest::IngestReport;
use crate::retrieve::RetrievedPassage;
use crate::vector::VectorSearchEngine;

const SNIPPET_CHARS: usize = 80;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

/// First `SNIPPET_CHARS` characters of `text` on a single line.
pub fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let mut cut: String = flat.chars().take(SNIPPET_CHARS - 1).collect();
        cut.push('…');
        cut
    }
}

/// Ranked retrieval results, nearest first.
pub fn create_results_table(passages: &[RetrievedPassage]) -> String {
    let mut table = new_table(&["#", "Document", "Page", "Confidence", "Distance", "Passage"]);

    for (rank, retrieved) in passages.iter().enumerate() {
        let confidence = retrieved.confidence.get();
        // Comfy-table handles its own colors; ANSI in cell text breaks widths.
        let color = if confidence >= 0.5 {
            Color::Green
        } else if confidence > 0.0 {
            Color::Yellow
        } else {
            Color::DarkGrey
        };
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(&retrieved.passage.doc_id),
            Cell::new(retrieved.passage.page_number).set_alignment(CellAlignment::Right),
            Cell::new(format!("{confidence:.3}"))
                .fg(color)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", retrieved.distance)).set_alignment(CellAlignment::Right),
            Cell::new(snippet(&retrieved.passage.text)),
        ]);
    }

    table.to_string()
}

fn format_timestamp(secs: u64) -> String {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Geometry and list balance of a built index.
pub fn create_index_table(engine: &VectorSearchEngine) -> String {
    let metadata = engine.metadata();
    let sizes = engine.index().list_sizes();
    let min = sizes.iter().copied().min().unwrap_or(0);
    let max = sizes.iter().copied().max().unwrap_or(0);
    let empty = sizes.iter().filter(|&&s| s == 0).count();

    let mut table = new_table(&["Property", "Value"]);
    table.add_row(vec!["Model".to_string(), metadata.model_name.clone()]);
    table.add_row(vec!["Vectors".to_string(), engine.len().to_string()]);
    table.add_row(vec!["Dimension".to_string(), metadata.dimension.to_string()]);
    table.add_row(vec!["Lists (nlist)".to_string(), metadata.nlist.to_string()]);
    table.add_row(vec![
        "Sub-quantizers".to_string(),
        format!("{} x {} bits", metadata.m, metadata.nbits),
    ]);
    table.add_row(vec![
        "List sizes".to_string(),
        format!("min {min}, max {max}, empty {empty}"),
    ]);
    table.add_row(vec!["Created".to_string(), format_timestamp(metadata.created_at)]);
    table.add_row(vec!["Updated".to_string(), format_timestamp(metadata.updated_at)]);
    table.to_string()
}

/// Summary of an ingestion run.
pub fn create_ingest_table(report: &IngestReport, elapsed: std::time::Duration) -> String {
    let mut table = new_table(&["Files", "Passages", "Empty files", "Time"]);
    table.add_row(vec![
        report.files.to_string(),
        report.passages.to_string(),
        report.skipped_empty.to_string(),
        format!("{elapsed:.2?}"),
    ]);
    table.to_string()
}
