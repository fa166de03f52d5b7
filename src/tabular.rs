//! Tabular import/export of candidate apps and ranking results
//!
//! Import maps spreadsheet headers onto candidate-row attributes through
//! a fixed lookup table; unknown headers are ignored rather than
//! rejected, and cells pass through as opaque strings. Export renders a
//! fixed, ordered column set per report type as CSV text with a header
//! row. The multi-value raw-score field is comma-joined inside a single
//! quoted cell, and `parse_line`/`parse_scores` read it back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregate::CompositeRanking;
use crate::directory::AppProjection;
use crate::images::{is_redirector, ImageResolver};

/// Spreadsheet header -> candidate attribute. Both directions of the
/// codec use this one table, so `header -> attribute -> header` round
/// trips for every entry.
pub const HEADER_ATTRIBUTES: [(&str, &str); 10] = [
    ("Name", "name"),
    ("Category", "category"),
    ("Blockchains", "blockchain"),
    ("Website", "website"),
    ("Storage", "storage_network"),
    ("Authentication", "authentication"),
    ("Open Source Client?", "open_source_url"),
    ("Registration Open?", "registration_is_open"),
    ("Description", "description"),
    ("Image", "image_url"),
];

pub fn attribute_for_header(header: &str) -> Option<&'static str> {
    HEADER_ATTRIBUTES
        .iter()
        .find(|(h, _)| *h == header)
        .map(|(_, attr)| *attr)
}

pub fn header_for_attribute(attribute: &str) -> Option<&'static str> {
    HEADER_ATTRIBUTES
        .iter()
        .find(|(_, attr)| *attr == attribute)
        .map(|(h, _)| *h)
}

/// One imported candidate-app row. Absent headers stay `None`; the
/// boolean flag defaults to closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub name: Option<String>,
    pub category: Option<String>,
    pub blockchain: Option<String>,
    pub website: Option<String>,
    pub storage_network: Option<String>,
    pub authentication: Option<String>,
    pub open_source_url: Option<String>,
    pub registration_is_open: bool,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Map one raw `header -> cell` row onto a candidate row. Cells are kept
/// verbatim: no coercion, no trimming. The registration flag is true iff
/// the cell is literally `YES`.
pub fn parse_candidate_row(cells: &HashMap<String, String>) -> CandidateRow {
    let mut row = CandidateRow::default();
    for (header, cell) in cells {
        let Some(attribute) = attribute_for_header(header) else {
            continue;
        };
        match attribute {
            "name" => row.name = Some(cell.clone()),
            "category" => row.category = Some(cell.clone()),
            "blockchain" => row.blockchain = Some(cell.clone()),
            "website" => row.website = Some(cell.clone()),
            "storage_network" => row.storage_network = Some(cell.clone()),
            "authentication" => row.authentication = Some(cell.clone()),
            "open_source_url" => row.open_source_url = Some(cell.clone()),
            "registration_is_open" => row.registration_is_open = cell == "YES",
            "description" => row.description = Some(cell.clone()),
            "image_url" => row.image_url = Some(cell.clone()),
            _ => unreachable!("attribute table covers all branches"),
        }
    }
    row
}

/// Follow the image attribute through the resolver collaborator when it
/// points at a known redirector; otherwise the raw value stands. A
/// resolver failure keeps the raw URL rather than dropping the row.
pub async fn resolve_row_image(
    row: &mut CandidateRow,
    resolver: &dyn ImageResolver,
    redirector_hosts: &[String],
) {
    let Some(url) = row.image_url.clone() else {
        return;
    };
    if !is_redirector(&url, redirector_hosts) {
        return;
    }
    match resolver.canonical_image(&url).await {
        Ok(canonical) => row.image_url = Some(canonical),
        Err(e) => {
            warn!("Keeping raw image URL {}: {}", url, e);
        }
    }
}

// ============================================================================
// EXPORT
// ============================================================================

pub const CANDIDATE_COLUMNS: [&str; 5] = ["id", "name", "website", "description", "image"];
pub const RANKING_COLUMNS: [&str; 5] = ["id", "name", "composite_score", "standard_scores", "rank"];

/// Render the candidate list report.
pub fn render_candidates(apps: &[AppProjection]) -> String {
    let rows = apps
        .iter()
        .map(|app| {
            vec![
                app.id.to_string(),
                app.name.clone(),
                app.website.clone(),
                app.description.clone(),
                app.image_url.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&CANDIDATE_COLUMNS, &rows)
}

/// Render the ranking report for a period. Each entry pairs a composite
/// result with the application's display name.
pub fn render_rankings(entries: &[(CompositeRanking, String)]) -> String {
    let rows = entries
        .iter()
        .map(|(composite, name)| {
            vec![
                composite.app_id.to_string(),
                name.clone(),
                format_score(composite.composite_score),
                join_scores(&composite.standard_scores),
                composite.rank.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&RANKING_COLUMNS, &rows)
}

pub fn join_scores(scores: &[f64]) -> String {
    scores
        .iter()
        .map(|s| format_score(*s))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_scores(cell: &str) -> Vec<f64> {
    cell.split(',')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn format_score(score: f64) -> String {
    format!("{score}")
}

fn render_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str(&columns.join(","));
    out.push('\n');
    for row in rows {
        let line = row
            .iter()
            .map(|cell| format_cell(cell))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn format_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Split one rendered line back into cells, honoring the quoting
/// `format_cell` applies.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => cells.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }
    cells.push(current);
    cells
}
