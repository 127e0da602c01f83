//! Merge of source page membership, cached entries and fresh API data.

use std::cmp::Reverse;
use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::arxiv::DetailFetcher;
use crate::cache::CacheMap;
use crate::config::ResultOrder;
use crate::entry::{is_complete, Entry, SourceItem};
use crate::text::parse_feed_date;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub order: ResultOrder,
    /// Pause between two consecutive detail fetches.
    pub request_delay: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { order: ResultOrder::default(), request_delay: Duration::from_secs(2) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// One entry per source item, ordered per `ReconcileOptions::order`.
    pub entries: Vec<Entry>,
    /// Exactly the ids of this run's source items.
    pub cache: CacheMap,
    pub reused: usize,
    pub fetched: usize,
    /// Fetched entries that are still incomplete.
    pub failed: usize,
}

/// Decide per source item whether the cached entry can be reused, fetch the
/// rest one by one, and rebuild the cache from the result.
///
/// Every source item yields exactly one entry. Incomplete cached entries are
/// refetched in full, never patched; ids missing from `items` drop out of the
/// returned cache.
pub fn reconcile<F>(
    items: &[SourceItem],
    cache: &CacheMap,
    fetcher: &F,
    opts: &ReconcileOptions,
) -> Reconciliation
where
    F: DetailFetcher + ?Sized,
{
    info!(page_entries = items.len(), cached_entries = cache.len(), "reconciling");

    let mut reused: Vec<(usize, Entry)> = Vec::new();
    let mut to_fetch: Vec<(usize, &SourceItem)> = Vec::new();

    for (pos, item) in items.iter().enumerate() {
        match cache.get(&item.id) {
            Some(cached) if is_complete(cached) => {
                debug!(link = %item.link, "complete cached entry");
                reused.push((pos, cached.clone()));
            }
            Some(_) => {
                info!(link = %item.link, "incomplete cached entry, will refetch");
                to_fetch.push((pos, item));
            }
            None => {
                debug!(link = %item.link, "new entry");
                to_fetch.push((pos, item));
            }
        }
    }

    info!(complete = reused.len(), need_fetch = to_fetch.len(), "entries analysed");
    if to_fetch.is_empty() {
        info!("all entries complete, nothing to fetch");
    }

    let total = to_fetch.len();
    let mut fetched: Vec<(usize, Entry)> = Vec::with_capacity(total);
    for (i, (pos, item)) in to_fetch.into_iter().enumerate() {
        info!(progress = %format!("{}/{}", i + 1, total), link = %item.link, "fetching details");
        let details = fetcher.fetch_details(&item.link);
        fetched.push((pos, Entry::from_details(item, details)));

        if i + 1 < total && !opts.request_delay.is_zero() {
            sleep(opts.request_delay);
        }
    }

    let failed = fetched.iter().filter(|(_, e)| !is_complete(e)).count();
    if failed > 0 {
        warn!(failed, "entries still incomplete after fetching");
    }

    let (reused_count, fetched_count) = (reused.len(), fetched.len());
    let entries = order_entries(reused, fetched, opts.order);
    let cache = entries.iter().map(|e| (e.id.clone(), e.clone())).collect();

    info!(
        total = entries.len(),
        reused = reused_count,
        fetched = fetched_count,
        "reconciliation done"
    );

    Reconciliation {
        entries,
        cache,
        reused: reused_count,
        fetched: fetched_count,
        failed,
    }
}

fn order_entries(
    reused: Vec<(usize, Entry)>,
    fetched: Vec<(usize, Entry)>,
    order: ResultOrder,
) -> Vec<Entry> {
    match order {
        ResultOrder::ReuseThenFetched => {
            reused.into_iter().chain(fetched).map(|(_, e)| e).collect()
        }
        ResultOrder::Page => {
            let mut all: Vec<_> = reused.into_iter().chain(fetched).collect();
            all.sort_by_key(|(pos, _)| *pos);
            all.into_iter().map(|(_, e)| e).collect()
        }
        ResultOrder::NewestFirst => {
            let mut all: Vec<_> = reused.into_iter().chain(fetched).collect();
            all.sort_by_key(|(pos, _)| *pos);
            let mut entries: Vec<Entry> = all.into_iter().map(|(_, e)| e).collect();
            // stable: equal or missing dates keep page order, undated last
            entries.sort_by_key(|e| Reverse(e.pubdate.as_deref().and_then(parse_feed_date)));
            entries
        }
    }
}
