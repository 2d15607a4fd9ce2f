//! Window planning: split datasets into fixed-size chunks clipped to a global range.

use crate::models::Window;

/// Default number of items fetched per window.
pub const DEFAULT_BATCH_SIZE: u64 = 50_000;

/// Default global limit when none is requested (effectively the whole dataset).
pub const DEFAULT_LIMIT: u64 = 999_999_999;

/// Local `(offset, limit)` of one chunk after clipping to the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRange {
    pub offset: u64,
    pub limit: u64,
}

/// Intersect chunk `[local_start, local_start + batch_size)` with the
/// requested `[offset, offset + limit)`. Returns `None` when they do not overlap.
pub fn local_offset_limit(
    offset: u64,
    limit: u64,
    local_start: u64,
    batch_size: u64,
) -> Option<LocalRange> {
    let local_end = local_start + batch_size;
    let input_end = offset.saturating_add(limit);

    if offset >= local_end || input_end <= local_start {
        return None;
    }

    let limit = if input_end >= local_end {
        if offset < local_start {
            batch_size
        } else {
            local_end - offset
        }
    } else if offset < local_start {
        input_end - local_start
    } else {
        // Both bounds inside the chunk
        limit
    };

    Some(LocalRange {
        offset: offset.max(local_start),
        limit,
    })
}

/// Planning parameters shared by every dataset of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub batch_size: u64,
    pub offset: u64,
    pub limit: u64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Plan the windows of one dataset.
pub fn plan_dataset(
    dataset_id: &str,
    dataset_index: usize,
    item_count: u64,
    options: &PlanOptions,
) -> Vec<Window> {
    let batch_size = options.batch_size.max(1);
    let chunks = item_count.div_ceil(batch_size);

    (0..chunks)
        .filter_map(|chunk| {
            let range =
                local_offset_limit(options.offset, options.limit, chunk * batch_size, batch_size)
                    .filter(|range| range.limit > 0)?;
            Some(Window {
                dataset_id: dataset_id.to_string(),
                dataset_index,
                window_index: chunk as usize,
                offset: range.offset,
                limit: range.limit,
            })
        })
        .collect()
}

/// Plan windows for datasets given as `(id, item_count)` in request order.
pub fn plan_windows(datasets: &[(String, u64)], options: &PlanOptions) -> Vec<Window> {
    datasets
        .iter()
        .enumerate()
        .flat_map(|(index, (id, count))| plan_dataset(id, index, *count, options))
        .collect()
}
