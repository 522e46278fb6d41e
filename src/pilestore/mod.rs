mod records;
mod store;

pub use records::{
    pack_group, read_groups, BoundsProxy, GhostWay, GroupKind, LocalBounds, LocalRelation,
    LocalWay, Membership, NodeProxy, PileContents, PileRecords, Record,
};
pub use store::PileStore;

use crate::utils::Result;

/// Packs `records` and appends them to `store`, one append per pile.
pub fn write_records(store: &PileStore, records: PileRecords) -> Result<usize> {
    let mut nbytes = 0;
    for (pile, data) in records.pack()? {
        nbytes += data.len();
        store.append(pile, &data)?;
    }
    Ok(nbytes)
}
