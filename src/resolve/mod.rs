mod batches;
mod resolvepile;
mod resolver;

pub use batches::{batch_key, pile_batches, Batch};
pub use resolvepile::{resolve_pile, Bounds, PileOutcome, PileState, PileTask};
pub use resolver::{CrossTileResolver, ResolveSummary};
