use std::path::Path;

use jaunt_core::models::VisitId;

use crate::commands::common::open_journal;
use crate::error::CliError;

pub fn run_label(
    id: &str,
    label: &[String],
    db_path: &Path,
    device: &str,
) -> Result<(), CliError> {
    let visit_id: VisitId = id
        .parse()
        .map_err(|_| CliError::InvalidVisitId(id.to_string()))?;
    let journal = open_journal(db_path, device)?;

    let text = label.join(" ");
    let label = if text.trim().is_empty() {
        None
    } else {
        Some(text)
    };
    let visit = journal.set_label(&visit_id, label)?;
    match &visit.user_label {
        Some(label) => println!("Labelled {} as \"{label}\"", visit.id),
        None => println!("Cleared label on {}", visit.id),
    }
    Ok(())
}

pub fn run_favorite(id: &str, off: bool, db_path: &Path, device: &str) -> Result<(), CliError> {
    let visit_id: VisitId = id
        .parse()
        .map_err(|_| CliError::InvalidVisitId(id.to_string()))?;
    let journal = open_journal(db_path, device)?;

    let visit = journal.set_favorite(&visit_id, !off)?;
    if visit.is_favorite {
        println!("Marked {} as favorite", visit.id);
    } else {
        println!("Removed favorite from {}", visit.id);
    }
    Ok(())
}
