//! Order-preserving reassembly of windows fetched out of order.

use std::collections::BTreeMap;

use crate::models::{Record, Window};

/// Shape of collected items, depending on the concatenation flags.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedItems {
    /// dataset -> window -> items (no concatenation).
    Nested(Vec<Vec<Vec<Record>>>),
    /// dataset -> items (`concat_items` only).
    PerDataset(Vec<Vec<Record>>),
    /// window batches of every dataset in order (`concat_datasets` only).
    Batches(Vec<Vec<Record>>),
    /// Every item in dataset order, then window order.
    Flat(Vec<Record>),
}

impl LoadedItems {
    /// Flatten whatever shape into a single ordered item list.
    pub fn into_flat(self) -> Vec<Record> {
        match self {
            LoadedItems::Nested(datasets) => datasets.into_iter().flatten().flatten().collect(),
            LoadedItems::PerDataset(lists) | LoadedItems::Batches(lists) => {
                lists.into_iter().flatten().collect()
            }
            LoadedItems::Flat(items) => items,
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            LoadedItems::Nested(datasets) => datasets.iter().flatten().map(Vec::len).sum(),
            LoadedItems::PerDataset(lists) | LoadedItems::Batches(lists) => {
                lists.iter().map(Vec::len).sum()
            }
            LoadedItems::Flat(items) => items.len(),
        }
    }
}

/// Slots indexed by `[dataset_index][window_index]`.
#[derive(Debug)]
pub struct Assembler {
    slots: Vec<BTreeMap<usize, Vec<Record>>>,
}

impl Assembler {
    pub fn new(dataset_count: usize) -> Self {
        Self {
            slots: vec![BTreeMap::new(); dataset_count],
        }
    }

    pub fn insert(&mut self, window: &Window, items: Vec<Record>) {
        if window.dataset_index >= self.slots.len() {
            self.slots
                .resize_with(window.dataset_index + 1, BTreeMap::new);
        }
        self.slots[window.dataset_index].insert(window.window_index, items);
    }

    pub fn finish(self, concat_items: bool, concat_datasets: bool) -> LoadedItems {
        let nested: Vec<Vec<Vec<Record>>> = self
            .slots
            .into_iter()
            .map(|windows| windows.into_values().collect())
            .collect();

        match (concat_items, concat_datasets) {
            (true, true) => LoadedItems::Flat(nested.into_iter().flatten().flatten().collect()),
            (true, false) => LoadedItems::PerDataset(
                nested
                    .into_iter()
                    .map(|windows| windows.into_iter().flatten().collect())
                    .collect(),
            ),
            (false, true) => LoadedItems::Batches(nested.into_iter().flatten().collect()),
            (false, false) => LoadedItems::Nested(nested),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn window(dataset_index: usize, window_index: usize) -> Window {
        Window {
            dataset_id: format!("ds{dataset_index}"),
            dataset_index,
            window_index,
            offset: window_index as u64 * 2,
            limit: 2,
        }
    }

    fn items(tag: &str) -> Vec<Record> {
        (0..2)
            .map(|i| {
                let mut r = Record::new();
                r.insert("tag".to_string(), json!(format!("{tag}-{i}")));
                r
            })
            .collect()
    }

    fn tags(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r["tag"].as_str().unwrap().to_string())
            .collect()
    }

    fn filled(order: &[(usize, usize)]) -> Assembler {
        let mut assembler = Assembler::new(2);
        for (d, w) in order {
            assembler.insert(&window(*d, *w), items(&format!("{d}{w}")));
        }
        assembler
    }

    #[test]
    fn test_flat_order_ignores_arrival_order() {
        let expected = vec!["00-0", "00-1", "01-0", "01-1", "10-0", "10-1"];
        let orders: [&[(usize, usize)]; 3] = [
            &[(0, 0), (0, 1), (1, 0)],
            &[(1, 0), (0, 1), (0, 0)],
            &[(0, 1), (1, 0), (0, 0)],
        ];
        for order in orders {
            let flat = filled(order).finish(true, true).into_flat();
            assert_eq!(tags(&flat), expected);
        }
    }

    #[test]
    fn test_per_dataset_shape() {
        match filled(&[(1, 0), (0, 1), (0, 0)]).finish(true, false) {
            LoadedItems::PerDataset(lists) => {
                assert_eq!(lists.len(), 2);
                assert_eq!(tags(&lists[0]), vec!["00-0", "00-1", "01-0", "01-1"]);
                assert_eq!(tags(&lists[1]), vec!["10-0", "10-1"]);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_batches_and_nested_shapes() {
        match filled(&[(0, 1), (1, 0), (0, 0)]).finish(false, true) {
            LoadedItems::Batches(batches) => {
                assert_eq!(batches.len(), 3);
                assert_eq!(tags(&batches[1]), vec!["01-0", "01-1"]);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
        let nested = filled(&[(0, 1), (1, 0), (0, 0)]).finish(false, false);
        assert_eq!(nested.item_count(), 6);
        match nested {
            LoadedItems::Nested(datasets) => {
                assert_eq!(datasets[0].len(), 2);
                assert_eq!(datasets[1].len(), 1);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_dataset_without_windows_stays_empty() {
        let mut assembler = Assembler::new(3);
        assembler.insert(&window(2, 0), items("20"));
        match assembler.finish(true, false) {
            LoadedItems::PerDataset(lists) => {
                assert!(lists[0].is_empty());
                assert!(lists[1].is_empty());
                assert_eq!(lists[2].len(), 2);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }
}
