//! The shuffle stage: group map output by key and partition the keys
//! across reduce buckets.
//!
//! Grouping is pure and synchronous — it only re-keys already-materialized
//! map output, so there is nothing to parallelize. Map outputs are consumed
//! in task order with within-task emission order preserved, and groups are
//! key-sorted inside each bucket, so a given set of map outputs always
//! shuffles to the same buckets.

use bytes::Bytes;
use itertools::Itertools;

use common::{ihash, KeyValue};

/// One key and every value contributed for it during the map phase.
pub type ShuffleGroup = (Bytes, Vec<Bytes>);

/// Group all map output by key, then partition keys into `n_reduce`
/// buckets via `ihash(key) % n_reduce`. Every key lands in exactly one
/// bucket, so it is reduced exactly once.
pub fn shuffle(
    map_outputs: impl IntoIterator<Item = Vec<KeyValue>>,
    n_reduce: usize,
) -> Vec<Vec<ShuffleGroup>> {
    let n_reduce = n_reduce.max(1);

    let groups = map_outputs
        .into_iter()
        .flatten()
        .map(|kv| (kv.key, kv.value))
        .into_group_map();

    let mut buckets: Vec<Vec<ShuffleGroup>> = vec![Vec::new(); n_reduce];
    for (key, values) in groups {
        let bucket = (ihash(&key) as usize) % n_reduce;
        buckets[bucket].push((key, values));
    }

    for bucket in &mut buckets {
        bucket.sort_by(|a, b| a.0.cmp(&b.0));
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(
            Bytes::from(key.to_string()),
            Bytes::from(value.to_string()),
        )
    }

    #[test]
    fn groups_values_by_key() {
        let outputs = vec![
            vec![kv("the", "1"), kv("cat", "1"), kv("the", "1")],
            vec![kv("sat", "1")],
        ];

        let buckets = shuffle(outputs, 1);
        assert_eq!(buckets.len(), 1);

        let bucket = &buckets[0];
        let the = bucket
            .iter()
            .find(|(key, _)| key == "the".as_bytes())
            .unwrap();
        assert_eq!(the.1.len(), 2);
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn every_key_lands_in_exactly_one_bucket() {
        let outputs = vec![vec![
            kv("a", "1"),
            kv("b", "1"),
            kv("c", "1"),
            kv("d", "1"),
            kv("a", "1"),
        ]];

        let buckets = shuffle(outputs, 4);
        let total_groups: usize = buckets.iter().map(|bucket| bucket.len()).sum();
        assert_eq!(total_groups, 4);

        for bucket in &buckets {
            for (key, _) in bucket {
                let expected = (ihash(key) as usize) % 4;
                let actual = buckets
                    .iter()
                    .position(|b| b.iter().any(|(k, _)| k == key))
                    .unwrap();
                assert_eq!(actual, expected);
            }
        }
    }

    #[test]
    fn shuffle_is_deterministic() {
        let outputs = || {
            vec![
                vec![kv("the", "1"), kv("cat", "1")],
                vec![kv("the", "1"), kv("ran", "1")],
            ]
        };

        let first = shuffle(outputs(), 3);
        let second = shuffle(outputs(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn groups_are_key_sorted_within_bucket() {
        let outputs = vec![vec![kv("zebra", "1"), kv("ant", "1"), kv("mole", "1")]];
        let buckets = shuffle(outputs, 1);
        let keys: Vec<&Bytes> = buckets[0].iter().map(|(key, _)| key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn empty_input_shuffles_to_empty_buckets() {
        let buckets = shuffle(Vec::<Vec<KeyValue>>::new(), 3);
        assert_eq!(buckets.len(), 3);
        assert!(buckets.iter().all(|bucket| bucket.is_empty()));
    }

    #[test]
    fn zero_reduce_bucket_count_is_clamped() {
        let buckets = shuffle(vec![vec![kv("a", "1")]], 0);
        assert_eq!(buckets.len(), 1);
    }
}
