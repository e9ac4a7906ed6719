//! Markdown job summary and matrix file I/O.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::matrix::{MatrixDocument, ResolvedJob, Variant};

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn fat_cell(job: &ResolvedJob) -> String {
    match job.fat_skip_reason() {
        None => "yes".to_string(),
        Some(reason) => format!("no ({})", reason),
    }
}

fn push_tag_list(out: &mut String, job: &ResolvedJob, variant: Variant, label: &str) {
    let mut tags = job.tags_for(variant).peekable();
    if tags.peek().is_none() {
        return;
    }
    out.push_str(&format!("{}:\n", label));
    for tag in tags {
        out.push_str(&format!("- `{}`\n", tag.reference()));
    }
}

/// Render a markdown job summary for a CI step.
///
/// `generated_at` adds a timestamp line; leave it out for reproducible output.
pub fn render_summary_md(doc: &MatrixDocument, generated_at: Option<DateTime<Utc>>) -> String {
    let digest: String = doc.config_digest.chars().take(12).collect();
    let mut out = String::new();
    out.push_str("# Model Image Matrix\n\n");
    out.push_str(&format!("- config digest: `{}`\n", digest));
    if let Some(ts) = generated_at {
        out.push_str(&format!("- generated at: {}\n", ts.to_rfc3339()));
    }
    out.push('\n');

    out.push_str("| short | model | license | permissive | gated | fat | tags |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    for job in &doc.jobs {
        out.push_str(&format!(
            "| {} | `{}` | {} | {} | {} | {} | {} |\n",
            job.short,
            job.model_id,
            job.license_id,
            yes_no(job.is_permissive),
            yes_no(job.is_gated),
            fat_cell(job),
            job.tags.len()
        ));
    }
    out.push('\n');

    if doc.jobs.iter().any(|j| !j.tags.is_empty()) {
        out.push_str("## Tags\n");
        for job in doc.jobs.iter().filter(|j| !j.tags.is_empty()) {
            out.push_str(&format!("\n### {}\n", job.short));
            push_tag_list(&mut out, job, Variant::Slim, "Slim");
            push_tag_list(&mut out, job, Variant::Fat, "Fat");
        }
        out.push('\n');
    }

    if doc.warning_count > 0 {
        out.push_str("## Warnings\n");
        for job in &doc.jobs {
            for warning in &job.warnings {
                out.push_str(&format!("- **{}**: {}\n", job.short, warning));
            }
        }
        out.push('\n');
    }

    out.push_str("## Totals\n");
    out.push_str(&format!(
        "- jobs: {}\n- fat builds: {}\n- slim only: {}\n- warnings: {}\n",
        doc.jobs.len(),
        doc.fat_jobs(),
        doc.jobs.len() - doc.fat_jobs(),
        doc.warning_count
    ));
    out
}

/// Write the job summary markdown.
pub fn write_summary_md(
    path: &Path,
    doc: &MatrixDocument,
    generated_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let md = render_summary_md(doc, generated_at);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write the matrix document in pretty JSON format.
pub fn write_matrix_json(path: &Path, doc: &MatrixDocument) -> Result<()> {
    let content = doc.to_json().context("serialize matrix document")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a matrix document written by [`write_matrix_json`].
pub fn read_matrix_json(path: &Path) -> Result<MatrixDocument> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    MatrixDocument::from_json(&raw).with_context(|| format!("parse matrix document {:?}", path))
}
