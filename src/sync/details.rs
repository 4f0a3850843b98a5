//! The full sync cycle: summary refresh plus detail fan-out.
//!
//! Once the engine has produced new summary records, two things happen
//! concurrently: the refreshed summary list is persisted, and for every
//! configured fetch descriptor each new record's detail document is
//! fetched, projected and written. A failure anywhere fails the whole
//! batch for this cycle; the summary write may still have landed, which
//! the next run absorbs through the high-water mark.

use std::path::Path;

use futures::future::try_join_all;
use serde_json::{Map, Value};

use super::engine::collect_new_activities;
use super::{SyncError, ACTIVITY_ID};
use crate::client::Fetch;
use crate::config::{FetchConfig, SearchConfig};
use crate::env;
use crate::logger::Logger;
use crate::storage;

/// Runs one sync cycle. Returns the number of newly discovered records;
/// zero means nothing was persisted and no detail fetch was issued.
pub async fn update_activities<F: Fetch>(
    fetch: &F,
    search: &SearchConfig,
    fetches: &[FetchConfig],
    environment: &Map<String, Value>,
    logger: Logger,
) -> Result<usize, SyncError> {
    let resolved_path = search
        .path
        .evaluate(&env::overlay(environment, &search.parameters));

    logger.info(format!("Reading {resolved_path}..."));
    let old_activities = read_activities(Path::new(&resolved_path)).await?;
    logger.info(format!("{resolved_path} read."));

    logger.info("Updating activities...");
    let new_activities = collect_new_activities(
        fetch,
        &search.parameters,
        &old_activities,
        &search.pick,
        search.finish,
    )
    .await?;
    logger.info(format!(
        "Activities updated, got {} new activities.",
        new_activities.len()
    ));

    if new_activities.is_empty() {
        return Ok(0);
    }

    let combined: Vec<Value> = new_activities
        .iter()
        .chain(old_activities.iter())
        .cloned()
        .collect();
    let write_summary = async {
        logger.info(format!("Writing {resolved_path}..."));
        storage::write_json_path(Path::new(&resolved_path), &Value::Array(combined)).await?;
        logger.info(format!("{resolved_path} written."));
        Ok::<(), SyncError>(())
    };

    tokio::try_join!(
        write_summary,
        fetch_details_all(fetch, &new_activities, fetches, environment, logger)
    )?;
    Ok(new_activities.len())
}

/// Reads the stored summary records, validating that each one carries an
/// integer identifier. A missing file is an empty state.
async fn read_activities(path: &Path) -> Result<Vec<Value>, SyncError> {
    let data = storage::read_json_or_default(path, Value::Array(Vec::new())).await?;
    let items = match data {
        Value::Array(items) => items,
        _ => return Err(SyncError::InvalidStoredState(path.display().to_string())),
    };
    for (index, item) in items.iter().enumerate() {
        if item.get(ACTIVITY_ID).and_then(Value::as_i64).is_none() {
            return Err(SyncError::InvalidStoredActivity(index));
        }
    }
    Ok(items)
}

/// Runs every descriptor's fan-out concurrently. Skipped entirely when
/// there are no descriptors.
async fn fetch_details_all<F: Fetch>(
    fetch: &F,
    new_activities: &[Value],
    fetches: &[FetchConfig],
    environment: &Map<String, Value>,
    logger: Logger,
) -> Result<(), SyncError> {
    if fetches.is_empty() {
        return Ok(());
    }
    logger.info("Fetching activity details...");
    try_join_all(
        fetches
            .iter()
            .map(|descriptor| fetch_details(fetch, new_activities, descriptor, environment, logger)),
    )
    .await?;
    logger.info("Activity details fetched.");
    Ok(())
}

/// One descriptor's fan-out: fetch, project and write the detail
/// document of every new activity, all concurrently.
async fn fetch_details<F: Fetch>(
    fetch: &F,
    new_activities: &[Value],
    descriptor: &FetchConfig,
    environment: &Map<String, Value>,
    logger: Logger,
) -> Result<(), SyncError> {
    if let Some(title) = &descriptor.title {
        logger.info(format!("Fetching {title}..."));
    }
    let total = new_activities.len();
    try_join_all(new_activities.iter().enumerate().map(|(index, activity)| {
        let url = descriptor.url.evaluate(activity);
        let path = descriptor
            .path
            .evaluate(&env::overlay_record(environment, activity));
        let hint = if total > 1 {
            format!("({} of {})", index + 1, total)
        } else {
            String::new()
        };
        async move {
            let document = fetch.fetch_json(&url, &hint).await?;
            let projected = descriptor.pick.apply(&document);
            logger.info(format!("Writing {path}..."));
            storage::write_json_path(Path::new(&path), &projected).await?;
            logger.info(format!("{path} written."));
            Ok::<(), SyncError>(())
        }
    }))
    .await?;
    Ok(())
}
