use crate::backend::SelectQuery;
use crate::engine::actor::FeedHandle;
use crate::engine::lookup::Lookups;
use crate::engine::normalizer::normalize;
use crate::error::FeedError;
use crate::models::{ChangeType, NotificationKind, NotificationRecord, SourceEvent};
use crate::utils::now_utc;

/// Refetch recent rows for every source and reconcile them into the feed.
///
/// A source whose fetch fails is skipped and logged; the others still
/// merge. Malformed rows are dropped individually. Returns the number of
/// records that were new to the feed.
pub async fn refresh_feed(
    feed: &FeedHandle,
    lookups: &Lookups,
    limit: usize,
) -> Result<usize, FeedError> {
    let now = now_utc();
    let mut records: Vec<NotificationRecord> = Vec::new();

    for kind in NotificationKind::ALL {
        let filter = match lookups.scope().filter_for(kind) {
            Some(filter) => filter,
            None => continue,
        };
        let query = SelectQuery::new(kind.table(), filter)
            .newest_first("created_at")
            .limit(limit);

        let rows = match lookups.rows().select(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Refresh of {} failed, keeping current entries: {}", kind, e);
                continue;
            }
        };

        for row in rows {
            let event = match SourceEvent::from_row(kind, ChangeType::Insert, row) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Dropping {} row during refresh: {}", kind, e);
                    continue;
                }
            };
            let lookup = lookups.resolve(&event).await;
            records.push(normalize(&event, &lookup, now));
        }
    }

    log::debug!(
        "Refresh for {} fetched {} records",
        lookups.scope().parent_id,
        records.len()
    );
    feed.bulk_add(records).await
}
