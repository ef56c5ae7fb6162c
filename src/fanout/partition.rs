//! Contiguous chunking of a fan-out workload

/// Splits `items` into `worker_count` contiguous chunks
///
/// Every chunk but the trailing ones holds `ceil(len / worker_count)` items;
/// trailing chunks may be shorter or empty. The result always has exactly
/// `worker_count` entries (at least one).
pub fn partition<T>(items: Vec<T>, worker_count: usize) -> Vec<Vec<T>> {
    let worker_count = worker_count.max(1);
    let chunk_size = (items.len() + worker_count - 1) / worker_count;

    let mut remaining = items.into_iter();
    (0..worker_count)
        .map(|_| remaining.by_ref().take(chunk_size).collect())
        .collect()
}
