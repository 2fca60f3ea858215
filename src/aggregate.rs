//! Per-command result aggregation.
//!
//! Every aggregator is a pure function from the per-shard reply map to
//! merged output. Shard maps are `BTreeMap`s keyed by shard, so iteration
//! is always in shard-name order and the merged output is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::dispatch::ShardOutcome;
use crate::document::{Document, OrderedValue, Value};
use crate::topology::{Namespace, Shard};

/// Sum the database-wide storage counters and recompute the average object
/// size.
pub fn sum_database_stats(results: &BTreeMap<Shard, Document>, out: &mut Document) {
    let mut objects: i64 = 0;
    let mut data_size: i64 = 0;
    let mut storage_size: i64 = 0;
    let mut num_extents: i64 = 0;
    let mut indexes: i64 = 0;
    let mut index_size: i64 = 0;
    let mut file_size: i64 = 0;

    for reply in results.values() {
        objects += reply.get_i64("objects");
        data_size += reply.get_i64("dataSize");
        storage_size += reply.get_i64("storageSize");
        num_extents += reply.get_i64("numExtents");
        indexes += reply.get_i64("indexes");
        index_size += reply.get_i64("indexSize");
        file_size += reply.get_i64("fileSize");
    }

    let avg_obj_size = if objects > 0 {
        data_size as f64 / objects as f64
    } else {
        0.0
    };

    out.push("objects", objects);
    out.push("avgObjSize", avg_obj_size);
    out.push("dataSize", data_size);
    out.push("storageSize", storage_size);
    out.push("numExtents", num_extents);
    out.push("indexes", indexes);
    out.push("indexSize", index_size);
    out.push("fileSize", file_size);
}

/// Merge per-shard collection stats. Index counts normally agree; when they
/// do not, report the max and warn, since an index build may be in flight.
pub fn merge_collection_stats(
    ns: &Namespace,
    results: &BTreeMap<Shard, Document>,
    nchunks: usize,
    out: &mut Document,
) {
    let mut count: i64 = 0;
    let mut size: i64 = 0;
    let mut storage_size: i64 = 0;
    let mut nindexes: i32 = 0;
    let mut warned_about_indexes = false;
    let mut shard_stats = Document::new();

    for (shard, reply) in results {
        count += reply.get_i64("count");
        size += reply.get_i64("size");
        storage_size += reply.get_i64("storageSize");

        let my_indexes = reply.get_i32("nindexes");
        if nindexes == 0 {
            nindexes = my_indexes;
        } else if nindexes != my_indexes {
            if my_indexes > nindexes {
                nindexes = my_indexes;
            }
            if !warned_about_indexes {
                out.push(
                    "warning",
                    "indexes don't all match - ok if ensureIndex is running",
                );
                warned_about_indexes = true;
            }
        }

        shard_stats.push(shard.name(), reply.clone());
    }

    let avg_obj_size = if count > 0 {
        size as f64 / count as f64
    } else {
        0.0
    };

    out.push("ns", ns.full());
    out.push("count", count);
    out.push("size", size);
    out.push("avgObjSize", avg_obj_size);
    out.push("storageSize", storage_size);
    out.push("nindexes", nindexes);
    out.push("nchunks", nchunks as i64);
    out.push("shards", shard_stats);
}

/// Sum per-shard `n` fields; the per-shard breakdown keeps shard-name order.
pub fn sum_counts(results: &BTreeMap<Shard, Document>) -> (i64, BTreeMap<String, i64>) {
    let mut total = 0;
    let mut per_shard = BTreeMap::new();
    for (shard, reply) in results {
        let mine = reply.get_i64("n");
        total += mine;
        per_shard.insert(shard.name().to_string(), mine);
    }
    (total, per_shard)
}

/// Apply the client's `skip`/`limit` to an aggregated count. Skip subtracts
/// (clamped at zero); a non-zero limit caps, with negative limits read as
/// their magnitude.
pub fn apply_skip_limit(total: i64, cmd: &Document) -> i64 {
    let skip = cmd.get_i64("skip").max(0);
    let mut total = (total - skip).max(0);

    let limit = cmd.get_i64("limit").abs();
    if limit > 0 {
        total = total.min(limit);
    }
    total
}

/// Union of the per-shard `values` arrays under canonical value ordering,
/// emitted in that order.
pub fn union_distinct<'a>(replies: impl Iterator<Item = &'a Document>) -> Vec<Value> {
    let mut all: BTreeSet<OrderedValue> = BTreeSet::new();
    for reply in replies {
        if let Some(values) = reply.get_array("values") {
            for value in values {
                all.insert(OrderedValue(value.clone()));
            }
        }
    }
    all.into_iter().map(|v| v.0).collect()
}

/// Merged `geoNear` output.
pub struct GeoNearMerged {
    pub near: String,
    pub results: Vec<Document>,
    pub avg_distance: f64,
    pub max_distance: f64,
    pub time: f64,
    pub btreelocs: f64,
    pub nscanned: f64,
    pub objects_loaded: f64,
    pub shard_names: Vec<String>,
}

/// Merge per-shard `geoNear` replies by ascending distance, stable on ties
/// by shard-name order, cut off at `limit`.
pub fn merge_geo_near(results: &BTreeMap<Shard, Document>, limit: usize) -> GeoNearMerged {
    let mut near = String::new();
    let mut time = 0.0;
    let mut btreelocs = 0.0;
    let mut nscanned = 0.0;
    let mut objects_loaded = 0.0;
    let mut shard_names = Vec::new();
    let mut entries: Vec<(f64, Document)> = Vec::new();

    for (shard, reply) in results {
        shard_names.push(shard.name().to_string());
        if let Some(n) = reply.get_str("near") {
            near = n.to_string();
        }
        if let Some(stats) = reply.get_document("stats") {
            time += stats.get_f64("time");
            btreelocs += stats.get_f64("btreelocs");
            nscanned += stats.get_f64("nscanned");
            objects_loaded += stats.get_f64("objectsLoaded");
        }
        if let Some(shard_results) = reply.get_array("results") {
            for entry in shard_results {
                if let Some(entry) = entry.as_document() {
                    entries.push((entry.get_f64("dis"), entry.clone()));
                }
            }
        }
    }

    // stable sort keeps shard-name order on equal distances
    entries.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut kept = Vec::new();
    let mut total_distance = 0.0;
    let mut max_distance = 0.0;
    for (dis, entry) in entries.into_iter().take(limit) {
        total_distance += dis;
        max_distance = dis;
        kept.push(entry);
    }

    let avg_distance = if kept.is_empty() {
        0.0
    } else {
        total_distance / kept.len() as f64
    };

    GeoNearMerged {
        near,
        results: kept,
        avg_distance,
        max_distance,
        time,
        btreelocs,
        nscanned,
        objects_loaded,
        shard_names,
    }
}

/// Embed every shard's reply under `raw.<shard>`, failed shards included.
/// Returns the stringified shard-to-errmsg document when any shard failed.
pub fn embed_raw(outcomes: &BTreeMap<Shard, ShardOutcome>, out: &mut Document) -> Result<(), String> {
    let mut raw = Document::new();
    let mut errors = Document::new();

    for (shard, outcome) in outcomes {
        match outcome {
            ShardOutcome::Success(reply) => {
                raw.push(shard.name(), reply.clone());
            }
            ShardOutcome::Failure { reply, errmsg, .. } => {
                raw.push(shard.name(), reply.clone());
                errors.push(shard.name(), errmsg.clone());
            }
            ShardOutcome::Stale => {
                errors.push(shard.name(), "stale routing metadata");
            }
        }
    }

    out.push("raw", raw);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.to_string())
    }
}
