use std::path::Path;
use std::sync::Arc;

use jaunt_core::config::{GeocodeConfig, TrackingConfig};
use jaunt_core::geocode::{NoopGeocodeProvider, ReverseGeocodeCache};
use jaunt_core::models::LocationSample;
use jaunt_core::pipeline::TrackerPipeline;

use crate::commands::common::open_database;
use crate::error::CliError;

/// Feed a JSON file of samples through the full ingestion pipeline.
pub async fn run_ingest(file: &Path, db_path: &Path, device: &str) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(file)?;
    let samples: Vec<LocationSample> = serde_json::from_str(&raw)?;
    if samples.is_empty() {
        println!("No samples in {}", file.display());
        return Ok(());
    }

    let db = open_database(db_path)?;
    let geocoder = Arc::new(ReverseGeocodeCache::new(
        NoopGeocodeProvider,
        GeocodeConfig::default(),
        db.clone(),
    ));
    let pipeline = TrackerPipeline::spawn(
        db,
        geocoder,
        TrackingConfig::default(),
        device,
        256,
    );

    let sender = pipeline.sender();
    let total = samples.len();
    for sample in samples {
        sender.send(sample).await?;
    }
    drop(sender);
    let snapshot = pipeline.shutdown().await?;

    println!(
        "Ingested {total} samples: {} accepted, {} filtered",
        snapshot.ingest.accepted,
        snapshot.ingest.rejected()
    );
    println!(
        "Created {} visits and {} route segments",
        snapshot.visits_created, snapshot.segments_created
    );
    if snapshot.visits_created > 0 {
        println!("Run `jaunt detect` to group them into trips.");
    }
    Ok(())
}
