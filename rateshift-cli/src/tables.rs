//! CSV layouts for traits, posterior samples, fine grids and rates.
//!
//! Sample tables are written in long format with a leading `sample`
//! column. Within one sample, event rows keep their order, so the n-th
//! event row of sample `s` is event index `n` (1-based) for that sample.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use rateshift_core::{
    EventRow, FineSegmentRow, FineSegmentTable, NodeId, PosteriorSample, SegmentRow,
};
use rateshift_phylo::PhyloTree;

#[derive(Debug, Deserialize)]
struct TraitRecord {
    name: String,
    value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventRecord {
    sample: usize,
    time: f64,
    lambda_init: f64,
    lambda_shift: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentRecord {
    sample: usize,
    node: NodeId,
    start: f64,
    end: f64,
    event: usize,
}

#[derive(Debug, Serialize)]
struct NodeRecord<'a> {
    node: NodeId,
    name: &'a str,
    parent: Option<NodeId>,
    start: f64,
    end: f64,
}

#[derive(Debug, Serialize)]
struct RateRecord {
    node: NodeId,
    start: f64,
    end: f64,
    rate: f64,
}

/// Read `name,value` rows into a map keyed by tip name.
pub fn read_traits(path: &Path) -> Result<HashMap<String, f64>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open traits: {}", path.display()))?;
    let mut traits = HashMap::new();
    for (line, record) in reader.deserialize::<TraitRecord>().enumerate() {
        let record =
            record.with_context(|| format!("bad trait row {} in {}", line + 1, path.display()))?;
        if traits.insert(record.name.clone(), record.value).is_some() {
            bail!("tip '{}' listed twice in {}", record.name, path.display());
        }
    }
    Ok(traits)
}

/// Write posterior samples as long-format event and segment tables.
pub fn write_samples(events: &Path, segments: &Path, samples: &[PosteriorSample]) -> Result<()> {
    let mut ev = csv::Writer::from_path(events)
        .with_context(|| format!("failed to create {}", events.display()))?;
    let mut sg = csv::Writer::from_path(segments)
        .with_context(|| format!("failed to create {}", segments.display()))?;
    for (sample, posterior) in samples.iter().enumerate() {
        for row in posterior.events.iter() {
            ev.serialize(EventRecord {
                sample,
                time: row.time,
                lambda_init: row.lambda_init,
                lambda_shift: row.lambda_shift,
            })?;
        }
        for row in posterior.segments.iter() {
            sg.serialize(SegmentRecord {
                sample,
                node: row.node,
                start: row.start,
                end: row.end,
                event: row.event,
            })?;
        }
    }
    ev.flush()?;
    sg.flush()?;
    Ok(())
}

/// Read long-format event and segment tables back into samples, ordered by
/// sample index.
pub fn read_samples(events: &Path, segments: &Path) -> Result<Vec<PosteriorSample>> {
    let mut by_sample: BTreeMap<usize, PosteriorSample> = BTreeMap::new();

    let mut reader = csv::Reader::from_path(events)
        .with_context(|| format!("failed to open events: {}", events.display()))?;
    for (line, record) in reader.deserialize::<EventRecord>().enumerate() {
        let r = record
            .with_context(|| format!("bad event row {} in {}", line + 1, events.display()))?;
        by_sample.entry(r.sample).or_default().events.push(EventRow {
            time: r.time,
            lambda_init: r.lambda_init,
            lambda_shift: r.lambda_shift,
        });
    }

    let mut reader = csv::Reader::from_path(segments)
        .with_context(|| format!("failed to open segments: {}", segments.display()))?;
    for (line, record) in reader.deserialize::<SegmentRecord>().enumerate() {
        let r = record
            .with_context(|| format!("bad segment row {} in {}", line + 1, segments.display()))?;
        by_sample.entry(r.sample).or_default().segments.push(SegmentRow {
            node: r.node,
            start: r.start,
            end: r.end,
            event: r.event,
        });
    }

    Ok(by_sample.into_values().collect())
}

/// Read a `node,start,end` fine segmentation.
pub fn read_fine(path: &Path) -> Result<FineSegmentTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open fine grid: {}", path.display()))?;
    reader
        .deserialize::<FineSegmentRow>()
        .enumerate()
        .map(|(line, record)| {
            record.with_context(|| format!("bad fine row {} in {}", line + 1, path.display()))
        })
        .collect()
}

/// Write the fine segmentation with its reconstructed rates.
pub fn write_rates(path: &Path, fine: &FineSegmentTable, rates: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for (i, &rate) in rates.iter().enumerate() {
        let row = fine.row(i);
        writer.serialize(RateRecord {
            node: row.node,
            start: row.start,
            end: row.end,
            rate,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one row per node with its arena id and branch span.
pub fn write_nodes(path: &Path, tree: &PhyloTree) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for id in tree.iter_preorder() {
        let name = tree
            .get_node(id)
            .and_then(|n| n.name.as_deref())
            .unwrap_or("");
        writer.serialize(NodeRecord {
            node: id,
            name,
            parent: tree.parent(id),
            start: tree.branch_start(id),
            end: tree.branch_end(id),
        })?;
    }
    writer.flush()?;
    Ok(())
}
