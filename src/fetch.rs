use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::model::Identified;

/// Fetches the children of every parent concurrently and merges them.
///
/// One task per parent. The first child error aborts the remaining tasks and
/// is returned; nothing partial is kept. On success children are flattened
/// in parent order, then child order, keeping only the first occurrence of
/// each id, so the result does not depend on which request finished first.
pub async fn fetch_all<P, C, E, F, Fut>(parents: Vec<P>, fetch_child: F) -> Result<Vec<C>, E>
where
    P: Send + 'static,
    C: Identified + Send + 'static,
    E: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<C>, E>> + Send + 'static,
{
    let limit = parents.len();
    fetch_all_bounded(parents, limit, fetch_child).await
}

/// [`fetch_all`] with at most `limit` child requests in flight.
pub async fn fetch_all_bounded<P, C, E, F, Fut>(parents: Vec<P>, limit: usize, fetch_child: F) -> Result<Vec<C>, E>
where
    P: Send + 'static,
    C: Identified + Send + 'static,
    E: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<C>, E>> + Send + 'static,
{
    let total = parents.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    debug!("fetch_all: {} parents, limit {}", total, limit);

    let permits = Arc::new(Semaphore::new(limit.clamp(1, total)));
    let fetch_child = Arc::new(fetch_child);
    // dropping the set (early return or caller cancellation) aborts every task
    let mut tasks = JoinSet::new();
    for (index, parent) in parents.into_iter().enumerate() {
        let permits = permits.clone();
        let fetch_child = fetch_child.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (index, fetch_child(parent).await)
        });
    }

    let mut slots: Vec<Option<Vec<C>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(children))) => slots[index] = Some(children),
            Ok((index, Err(e))) => {
                debug!("fetch_all: parent #{} failed, aborting {} siblings", index, tasks.len());
                tasks.abort_all();
                return Err(e);
            }
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(_) => {}
        }
    }

    Ok(dedup_by_id(slots.into_iter().flatten().flatten()))
}

fn dedup_by_id<C: Identified>(items: impl IntoIterator<Item = C>) -> Vec<C> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.id().to_string()) {
            out.push(item);
        }
    }
    out
}
