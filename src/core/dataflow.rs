//! Keyed aggregation over parallel iterators. Each rayon worker folds into a
//! local map and the maps are merged pairwise.

use rayon::prelude::*;
use std::collections::HashMap;
use std::hash::Hash;

/// Combines all values that share a key with `combine`, which must be
/// associative and commutative.
pub fn reduce_by_key<I, K, V, F>(items: I, combine: F) -> HashMap<K, V>
where
    I: IntoParallelIterator<Item = (K, V)>,
    K: Eq + Hash + Send,
    V: Send,
    F: Fn(V, V) -> V + Sync + Send,
{
    items
        .into_par_iter()
        .fold(HashMap::new, |mut acc, (key, value)| {
            merge_value(&mut acc, key, value, &combine);
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (key, value) in right {
                merge_value(&mut left, key, value, &combine);
            }
            left
        })
}

/// Collects every value under its key. Value order within a group is
/// unspecified.
pub fn group_by_key<I, K, V>(items: I) -> HashMap<K, Vec<V>>
where
    I: IntoParallelIterator<Item = (K, V)>,
    K: Eq + Hash + Send,
    V: Send,
{
    items
        .into_par_iter()
        .fold(HashMap::new, |mut acc: HashMap<K, Vec<V>>, (key, value)| {
            acc.entry(key).or_default().push(value);
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (key, mut values) in right {
                left.entry(key).or_default().append(&mut values);
            }
            left
        })
}

fn merge_value<K, V, F>(map: &mut HashMap<K, V>, key: K, value: V, combine: &F)
where
    K: Eq + Hash,
    F: Fn(V, V) -> V,
{
    match map.remove(&key) {
        Some(current) => map.insert(key, combine(current, value)),
        None => map.insert(key, value),
    };
}
