use std::fmt;
use std::sync::Arc;

use crate::catalog::TileCatalog;
use crate::config::BuildOptions;
use crate::defaultlogger::register_build_messenger;
use crate::elements::{Feature, Node, Relation, Way};
use crate::linker::{compact_piles, link_tiles, write_archive, ArchiveIndex, LinkStats, LinkedTile, TileCompactor};
use crate::message;
use crate::partition::{PartitionStats, Partitioner};
use crate::pilestore::PileStore;
use crate::progress_percent;
use crate::resolve::{CrossTileResolver, ResolveSummary};
use crate::utils::{Checktime, LogTimes, Result, Timings};

/// Features per block handed to a partition worker.
pub const BLOCK_LEN: usize = 8000;

pub struct BuildReport {
    pub partition: PartitionStats,
    pub resolve: ResolveSummary,
    pub link: LinkStats,
    pub tiles: Vec<LinkedTile>,
    pub archive: Option<ArchiveIndex>,
    pub timings: Timings,
    pub times: LogTimes,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n", self.partition)?;
        write!(f, "{}\n", self.resolve)?;
        write!(
            f,
            "{} tiles, {} references linked, {} unresolved\n",
            self.link.tiles, self.link.linked, self.link.unresolved
        )?;
        write!(f, "{}", self.times)
    }
}

/// Collects features into blocks of one type. Blocks are passed to the
/// partitioner `numchan` at a time, and whenever the feature type changes.
struct BlockFeeder {
    nodes: Vec<Node>,
    ways: Vec<Way>,
    relations: Vec<Relation>,
    node_blocks: Vec<Vec<Node>>,
    way_blocks: Vec<Vec<Way>>,
    relation_blocks: Vec<Vec<Relation>>,
    max_blocks: usize,
}

impl BlockFeeder {
    fn new(numchan: usize) -> BlockFeeder {
        BlockFeeder {
            nodes: Vec::new(),
            ways: Vec::new(),
            relations: Vec::new(),
            node_blocks: Vec::new(),
            way_blocks: Vec::new(),
            relation_blocks: Vec::new(),
            max_blocks: usize::max(numchan, 1) * 2,
        }
    }

    fn add(&mut self, partitioner: &mut Partitioner, f: Feature) -> Result<()> {
        match f {
            Feature::Node(n) => {
                if !self.ways.is_empty() || !self.relations.is_empty() {
                    self.flush(partitioner)?;
                }
                self.nodes.push(n);
                if self.nodes.len() == BLOCK_LEN {
                    self.node_blocks.push(std::mem::take(&mut self.nodes));
                }
            }
            Feature::Way(w) => {
                if !self.nodes.is_empty() || !self.node_blocks.is_empty() || !self.relations.is_empty() {
                    self.flush(partitioner)?;
                }
                self.ways.push(w);
                if self.ways.len() == BLOCK_LEN {
                    self.way_blocks.push(std::mem::take(&mut self.ways));
                }
            }
            Feature::Relation(r) => {
                if !self.nodes.is_empty()
                    || !self.node_blocks.is_empty()
                    || !self.ways.is_empty()
                    || !self.way_blocks.is_empty()
                {
                    self.flush(partitioner)?;
                }
                self.relations.push(r);
                if self.relations.len() == BLOCK_LEN {
                    self.relation_blocks.push(std::mem::take(&mut self.relations));
                }
            }
        }
        if self.node_blocks.len() + self.way_blocks.len() + self.relation_blocks.len() >= self.max_blocks {
            self.flush(partitioner)?;
        }
        Ok(())
    }

    fn flush(&mut self, partitioner: &mut Partitioner) -> Result<()> {
        if !self.nodes.is_empty() {
            self.node_blocks.push(std::mem::take(&mut self.nodes));
        }
        if !self.node_blocks.is_empty() {
            partitioner.add_nodes(std::mem::take(&mut self.node_blocks))?;
        }
        if !self.ways.is_empty() {
            self.way_blocks.push(std::mem::take(&mut self.ways));
        }
        if !self.way_blocks.is_empty() {
            partitioner.add_ways(std::mem::take(&mut self.way_blocks))?;
        }
        if !self.relations.is_empty() {
            self.relation_blocks.push(std::mem::take(&mut self.relations));
        }
        if !self.relation_blocks.is_empty() {
            partitioner.add_relations(std::mem::take(&mut self.relation_blocks))?;
        }
        Ok(())
    }
}

fn phase_percent(f: &Feature) -> f64 {
    match f {
        Feature::Node(_) => 0.0,
        Feature::Way(_) => 33.3,
        Feature::Relation(_) => 66.7,
    }
}

/// Partitions `features` (nodes, then ways, then relations) into the piles
/// of `catalog`, resolves cross tile references, compacts each pile with
/// `compactor` and links the results. With `outfn` set the linked tiles are
/// also written to an archive.
pub fn run_build<I>(
    catalog: Arc<TileCatalog>,
    features: I,
    store: Arc<PileStore>,
    compactor: Arc<dyn TileCompactor>,
    outfn: Option<&str>,
    options: &BuildOptions,
) -> Result<BuildReport>
where
    I: IntoIterator<Item = Feature>,
{
    options.check()?;
    if options.console_messages {
        if let Err(e) = register_build_messenger(true) {
            message!("console messenger not installed: {}", e);
        }
    }
    let mut times = LogTimes::new();
    let mut timings = Timings::new();

    let mut partitioner = Partitioner::new(catalog.clone(), store.clone(), options)?;
    let mut feeder = BlockFeeder::new(options.numchan);
    let pb = progress_percent!("partition {} piles", catalog.pile_count());
    let mut ct = Checktime::with_threshold(10.0);
    let mut count = 0usize;
    let mut last_pc = -1.0;
    for f in features {
        let pc = phase_percent(&f);
        if pc != last_pc {
            pb.progress_percent(pc);
            last_pc = pc;
        }
        count += 1;
        if let Some(t) = ct.checktime() {
            pb.change_message(&format!("partition: {} features after {:.1}s", count, t));
        }
        feeder.add(&mut partitioner, f)?;
    }
    feeder.flush(&mut partitioner)?;
    pb.change_message("deferred relations");
    let partition = partitioner.finish()?;
    pb.progress_percent(100.0);
    pb.finish();
    timings.combine(partitioner.timings().clone());
    store.flush()?;
    times.add("partition");

    let resolve = CrossTileResolver::new(catalog.clone(), store.clone(), options.numchan).run()?;
    timings.combine(resolve.timings.clone());
    store.flush()?;
    times.add("resolve");

    let (compacted, tms) = compact_piles(catalog.clone(), store.clone(), compactor, options.numchan)?;
    timings.combine(tms);
    times.add("compact");

    let (tiles, link) = link_tiles(compacted, options.numchan)?;
    timings.combine(link.timings.clone());
    times.add("link");

    let archive = match outfn {
        Some(outfn) => {
            let index = write_archive(outfn, &catalog, &tiles, options.compress_blocks)?;
            times.add("write archive");
            Some(index)
        }
        None => None,
    };

    let report = BuildReport {
        partition,
        resolve,
        link,
        tiles,
        archive,
        timings,
        times,
    };
    message!("{}", report);
    Ok(report)
}
