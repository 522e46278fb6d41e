mod idtable;
mod partitioner;
mod relations;

pub use idtable::{IdTable, IdTableTile, ID_SPLIT_VAL};
pub use partitioner::{PartitionBlock, PartitionResult, Partitioner};
pub use relations::{completing_pile, DeferredRelations, RelationState};

use crate::elements::TileQuad;
use std::fmt;

/// Where every placed feature went.
#[derive(Default)]
pub struct Indexes {
    pub node_piles: IdTable<u32>,
    pub way_quads: IdTable<TileQuad>,
    pub relation_quads: IdTable<TileQuad>,
}

impl Indexes {
    pub fn new() -> Indexes {
        Indexes::default()
    }
}

/// Counts of what the partitioner did, including the features it could
/// only partly place.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PartitionStats {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    pub rejected_ways: usize,
    pub incomplete_ways: usize,
    pub incomplete_relations: usize,
    pub deferred_relations: usize,
    pub cycle_relations: usize,
    pub dropped_empty_relations: usize,
    pub purgatory_relations: usize,
    pub ghost_records: usize,
    pub membership_records: usize,
    pub relation_passes: usize,
    pub bytes_written: usize,
}

impl PartitionStats {
    pub fn combine(&mut self, o: &PartitionStats) {
        self.nodes += o.nodes;
        self.ways += o.ways;
        self.relations += o.relations;
        self.rejected_ways += o.rejected_ways;
        self.incomplete_ways += o.incomplete_ways;
        self.incomplete_relations += o.incomplete_relations;
        self.deferred_relations += o.deferred_relations;
        self.cycle_relations += o.cycle_relations;
        self.dropped_empty_relations += o.dropped_empty_relations;
        self.purgatory_relations += o.purgatory_relations;
        self.ghost_records += o.ghost_records;
        self.membership_records += o.membership_records;
        self.relation_passes += o.relation_passes;
        self.bytes_written += o.bytes_written;
    }
}

impl fmt::Display for PartitionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} ways, {} relations [{} deferred, {} in cycles, {} passes]; \
             {} ghost, {} membership records; {} bytes",
            self.nodes,
            self.ways,
            self.relations,
            self.deferred_relations,
            self.cycle_relations,
            self.relation_passes,
            self.ghost_records,
            self.membership_records,
            self.bytes_written
        )?;
        write!(
            f,
            "\nrejected {} ways; incomplete {} ways, {} relations; {} relations in purgatory, {} empty relations dropped",
            self.rejected_ways,
            self.incomplete_ways,
            self.incomplete_relations,
            self.purgatory_relations,
            self.dropped_empty_relations
        )
    }
}
