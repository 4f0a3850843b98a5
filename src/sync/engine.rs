//! The incremental pagination loop.
//!
//! Pages are assumed newest-first, the order the remote search endpoint
//! returns them in. The loop walks forward through pages until it hits
//! one of three stop conditions: an empty page, the configured `finish`
//! bound on the start offset, or a record whose identifier matches the
//! newest record already stored (the high-water mark). Everything seen
//! before the stop is new.

use serde_json::{Map, Value};

use super::{SyncError, ACTIVITY_ID};
use crate::client::{build_url, Fetch, ACTIVITY_SEARCH_URL};
use crate::projection::PickPolicy;

const DEFAULT_START: i64 = 0;
const DEFAULT_LIMIT: i64 = 20;

/// Fetches pages of the activity search endpoint until a stop condition
/// hits, returning the activities newer than anything in
/// `old_activities`, projected through `pick`, in remote page order.
pub async fn collect_new_activities<F: Fetch>(
    fetch: &F,
    parameters: &Map<String, Value>,
    old_activities: &[Value],
    pick: &PickPolicy,
    finish: Option<i64>,
) -> Result<Vec<Value>, SyncError> {
    let latest_id = old_activities
        .first()
        .and_then(|activity| activity.get(ACTIVITY_ID))
        .and_then(Value::as_i64)
        .unwrap_or(-1);

    let mut params = parameters.clone();
    let mut start = params
        .get("start")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_START);
    let limit = params
        .get("limit")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_LIMIT);

    let mut new_activities = Vec::new();
    loop {
        if let Some(finish) = finish {
            if start >= finish {
                break;
            }
        }
        params.insert("start".to_owned(), Value::from(start));
        params.insert("limit".to_owned(), Value::from(limit));
        tracing::debug!(start, limit, latest_id, "fetching activity page");

        let url = build_url(ACTIVITY_SEARCH_URL, &params);
        let page = match fetch.fetch_json(&url, "").await? {
            Value::Array(items) => items,
            _ => return Err(SyncError::UnexpectedResponse(url)),
        };
        if page.is_empty() {
            break;
        }

        let mut reached_known = false;
        for activity in &page {
            if activity.get(ACTIVITY_ID).and_then(Value::as_i64) == Some(latest_id) {
                reached_known = true;
                break;
            }
            new_activities.push(pick.apply(activity));
        }
        if reached_known {
            break;
        }
        start += limit;
    }

    Ok(new_activities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Field;
    use crate::sync::testing::ScriptedFetch;
    use serde_json::json;

    fn ids(activities: &[Value]) -> Vec<i64> {
        activities
            .iter()
            .map(|a| a[ACTIVITY_ID].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stops_at_high_water_mark() {
        let fetch = ScriptedFetch::with_pages(vec![json!([
            {"activityId": 7},
            {"activityId": 6},
            {"activityId": 5},
            {"activityId": 4},
        ])]);
        let stored = [json!({"activityId": 5}), json!({"activityId": 4})];

        let new = collect_new_activities(&fetch, &Map::new(), &stored, &PickPolicy::All, None)
            .await
            .unwrap();

        assert_eq!(ids(&new), [7, 6]);
        assert_eq!(fetch.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_first_page_yields_nothing() {
        let fetch = ScriptedFetch::with_pages(vec![json!([])]);
        let new = collect_new_activities(&fetch, &Map::new(), &[], &PickPolicy::All, None)
            .await
            .unwrap();
        assert!(new.is_empty());
        assert_eq!(fetch.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_advances_until_empty_page() {
        let fetch = ScriptedFetch::with_pages(vec![
            json!([{"activityId": 7}, {"activityId": 6}]),
            json!([{"activityId": 5}, {"activityId": 4}]),
            json!([]),
        ]);
        let mut parameters = Map::new();
        parameters.insert("limit".to_owned(), json!(2));

        let new = collect_new_activities(&fetch, &parameters, &[], &PickPolicy::All, None)
            .await
            .unwrap();

        assert_eq!(ids(&new), [7, 6, 5, 4]);
        let requested = fetch.requested();
        assert_eq!(requested.len(), 3);
        for (url, start) in requested.iter().zip(["start=0", "start=2", "start=4"]) {
            assert!(url.contains(start), "{url}");
            assert!(url.contains("limit=2"), "{url}");
        }
    }

    #[tokio::test]
    async fn test_finish_bound_stops_before_fetch() {
        let fetch = ScriptedFetch::with_pages(vec![
            json!([{"activityId": 7}]),
            json!([{"activityId": 6}]),
        ]);
        let mut parameters = Map::new();
        parameters.insert("limit".to_owned(), json!(1));

        let new = collect_new_activities(&fetch, &parameters, &[], &PickPolicy::All, Some(1))
            .await
            .unwrap();

        // start=0 fetches; start=1 >= finish stops without a request
        assert_eq!(ids(&new), [7]);
        assert_eq!(fetch.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_finish_at_zero_fetches_nothing() {
        let fetch = ScriptedFetch::with_pages(vec![json!([{"activityId": 7}])]);
        let new = collect_new_activities(&fetch, &Map::new(), &[], &PickPolicy::All, Some(0))
            .await
            .unwrap();
        assert!(new.is_empty());
        assert!(fetch.requested().is_empty());
    }

    #[tokio::test]
    async fn test_caller_filter_parameters_are_forwarded() {
        let fetch = ScriptedFetch::with_pages(vec![json!([])]);
        let mut parameters = Map::new();
        parameters.insert("activityType".to_owned(), json!("running"));

        collect_new_activities(&fetch, &parameters, &[], &PickPolicy::All, None)
            .await
            .unwrap();

        assert!(fetch.requested()[0].contains("activityType=running"));
    }

    #[tokio::test]
    async fn test_records_are_projected() {
        let fetch = ScriptedFetch::with_pages(vec![json!([
            {"activityId": 7, "activityName": "run", "calories": 300},
        ])]);
        let pick = PickPolicy::Explicit(vec![
            Field::parse(ACTIVITY_ID).unwrap(),
            Field::parse("activityName as name").unwrap(),
        ]);

        let new = collect_new_activities(&fetch, &Map::new(), &[], &pick, None)
            .await
            .unwrap();

        assert_eq!(new, [json!({"activityId": 7, "name": "run"})]);
    }

    #[tokio::test]
    async fn test_non_array_response_is_an_error() {
        let fetch = ScriptedFetch::with_pages(vec![json!({"error": "nope"})]);
        let result = collect_new_activities(&fetch, &Map::new(), &[], &PickPolicy::All, None).await;
        assert!(matches!(result, Err(SyncError::UnexpectedResponse(_))));
    }
}
