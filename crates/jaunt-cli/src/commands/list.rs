use std::path::Path;

use crate::commands::common::{
    format_distance, format_duration, format_time, open_journal, recent_window,
};
use crate::error::CliError;

pub fn run_visits(
    days: i64,
    limit: usize,
    as_json: bool,
    db_path: &Path,
    device: &str,
) -> Result<(), CliError> {
    let journal = open_journal(db_path, device)?;
    let (start_ms, end_ms) = recent_window(days);
    let mut visits = journal.visits(start_ms, end_ms)?;
    // Newest first for reading; storage order is oldest first
    visits.reverse();
    visits.truncate(limit);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&visits)?);
        return Ok(());
    }

    if visits.is_empty() {
        println!("No visits in the last {days} days.");
        return Ok(());
    }

    for visit in &visits {
        let duration = visit
            .duration_ms()
            .map_or_else(|| "ongoing".to_string(), format_duration);
        let star = if visit.is_favorite { "*" } else { " " };
        println!(
            "{star} {}  {}  {}  [{}]  {}",
            visit.id,
            format_time(visit.arrival_ms),
            duration,
            visit.category.as_str(),
            visit.display_name()
        );
    }
    Ok(())
}

pub fn run_trips(days: i64, as_json: bool, db_path: &Path, device: &str) -> Result<(), CliError> {
    let journal = open_journal(db_path, device)?;
    let (start_ms, end_ms) = recent_window(days);
    let trips = journal.trips(start_ms, end_ms)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&trips)?);
        return Ok(());
    }

    if trips.is_empty() {
        println!("No trips in the last {days} days.");
        return Ok(());
    }

    for trip in &trips {
        let span = match trip.end_ms {
            Some(end) => format!(
                "{} - {}",
                format_time(trip.start_ms),
                format_time(end)
            ),
            None => format!("{} - ongoing", format_time(trip.start_ms)),
        };
        let name = if trip.display_name.is_empty() {
            if trip.is_auto_detected {
                "(auto)"
            } else {
                "(unnamed)"
            }
        } else {
            trip.display_name.as_str()
        };
        let tags = if trip.tags.is_empty() {
            String::new()
        } else {
            format!("  #{}", trip.tags.join(" #"))
        };
        println!("{}  {span}  {name}{tags}", trip.id);
    }
    Ok(())
}

pub fn run_detect(days: i64, db_path: &Path, device: &str) -> Result<(), CliError> {
    let journal = open_journal(db_path, device)?;
    let (start_ms, end_ms) = recent_window(days);
    let trips = journal.detect_trips(start_ms, end_ms)?;

    if trips.is_empty() {
        println!("No trips detected in the last {days} days.");
        return Ok(());
    }
    for trip in &trips {
        let state = if trip.is_ongoing { "ongoing" } else { "closed" };
        println!(
            "{}  starts {}  {state}  {}",
            trip.id,
            format_time(trip.start_ms),
            trip.summary
        );
    }
    Ok(())
}

pub fn run_summary(
    granularity: crate::cli::Granularity,
    date: Option<&str>,
    as_json: bool,
    db_path: &Path,
    device: &str,
) -> Result<(), CliError> {
    use crate::cli::Granularity;
    use crate::commands::common::parse_date;
    use jaunt_core::aggregate::Period;

    let journal = open_journal(db_path, device)?;
    let anchor = parse_date(date)?;
    let period = match granularity {
        Granularity::Day => Period::Day(anchor),
        Granularity::Week => Period::Week(anchor),
        Granularity::Month => Period::Month(anchor),
    };
    let summary = journal.summary(period)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} trips, {} visits, {} travelled, {} on the move",
        summary.trip_count,
        summary.visit_count,
        format_distance(summary.total_distance_m),
        format_duration(summary.total_trip_duration_ms)
    );
    if !summary.top_places.is_empty() {
        println!("Top places:");
        for entry in &summary.top_places {
            println!("  {:>3}x  {}", entry.count, entry.name);
        }
    }
    if !summary.transport_histogram.is_empty() {
        println!("By transport:");
        for (transport, distance) in &summary.transport_histogram {
            println!("  {:<12} {}", transport.as_str(), format_distance(*distance));
        }
    }
    Ok(())
}
