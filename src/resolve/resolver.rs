use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::callback::{run_workers, CallFinish};
use crate::catalog::TileCatalog;
use crate::message;
use crate::pilestore::PileStore;
use crate::resolve::batches::{pile_batches, Batch};
use crate::resolve::resolvepile::{resolve_pile, PileOutcome, PileState};
use crate::task_sequence;
use crate::utils::{Error, Result, ThreadTimer, Timings};

struct ResolveWorker {
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    outcomes: Vec<PileOutcome>,
    error: Option<Error>,
    tm: f64,
}

impl CallFinish for ResolveWorker {
    type CallType = u32;
    type ReturnType = (Vec<PileOutcome>, Timings);

    fn call(&mut self, pile: u32) {
        if self.error.is_some() {
            return;
        }
        let tx = ThreadTimer::new();
        match resolve_pile(&self.catalog, &self.store, pile) {
            Ok(oc) => self.outcomes.push(oc),
            Err(e) => {
                self.error = Some(Error::PileStore(format!("pile {}: {}", pile, e)));
            }
        }
        self.tm += tx.since();
    }

    fn finish(&mut self) -> Result<(Vec<PileOutcome>, Timings)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut tms = Timings::new();
        tms.add("resolve", self.tm);
        Ok((std::mem::take(&mut self.outcomes), tms))
    }
}

/// Totals over every pile.
#[derive(Debug, Clone, Default)]
pub struct ResolveSummary {
    pub batches: usize,
    pub piles: BTreeMap<u32, PileState>,
    pub completed_ways: usize,
    pub partial_ways: usize,
    pub completed_relations: usize,
    pub partial_relations: usize,
    pub node_proxies: usize,
    pub bounds_proxies: usize,
    pub bytes_written: usize,
    pub timings: Timings,
}

impl ResolveSummary {
    fn add(&mut self, oc: &PileOutcome) {
        self.piles.insert(oc.pile, oc.state);
        self.completed_ways += oc.completed_ways;
        self.partial_ways += oc.partial_ways;
        self.completed_relations += oc.completed_relations;
        self.partial_relations += oc.partial_relations;
        self.node_proxies += oc.node_proxies;
        self.bounds_proxies += oc.bounds_proxies;
        self.bytes_written += oc.bytes_written;
    }

    pub fn all_done(&self) -> bool {
        self.piles.values().all(|s| *s == PileState::ProxiesEmitted)
    }
}

impl fmt::Display for ResolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} piles in {} batches: {} ways ({} partial), {} relations ({} partial); {} node, {} bounds proxies",
            self.piles.len(),
            self.batches,
            self.completed_ways,
            self.partial_ways,
            self.completed_relations,
            self.partial_relations,
            self.node_proxies,
            self.bounds_proxies
        )
    }
}

/// Runs every pile through [`resolve_pile`], batch by batch. Piles within
/// a batch are shared among `numchan` workers; a batch only starts once
/// the one before it has finished, and the first failure stops the run.
pub struct CrossTileResolver {
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    numchan: usize,
}

impl CrossTileResolver {
    pub fn new(catalog: Arc<TileCatalog>, store: Arc<PileStore>, numchan: usize) -> CrossTileResolver {
        CrossTileResolver {
            catalog,
            store,
            numchan,
        }
    }

    pub fn batches(&self) -> Vec<Batch> {
        pile_batches(&self.catalog)
    }

    pub fn run(&self) -> Result<ResolveSummary> {
        let batches = self.batches();
        let mut summary = ResolveSummary::default();
        summary.batches = batches.len();
        for p in self.catalog.piles() {
            summary.piles.insert(p, PileState::Unscanned);
        }

        let ts = task_sequence!(batches.len(), "resolve {} piles", self.catalog.pile_count());
        for b in batches {
            ts.start_task(&b.to_string());
            let numchan = usize::min(self.numchan, b.piles.len());
            let results = run_workers(b.piles, numchan, |_| {
                Box::new(ResolveWorker {
                    catalog: self.catalog.clone(),
                    store: self.store.clone(),
                    outcomes: Vec::new(),
                    error: None,
                    tm: 0.0,
                })
            });
            let results = match results {
                Ok(r) => r,
                Err(e) => {
                    ts.finish();
                    return Err(e);
                }
            };
            for (ocs, tms) in results {
                for oc in &ocs {
                    summary.add(oc);
                }
                summary.timings.combine(tms);
            }
        }
        ts.finish();

        message!("{}", summary);
        Ok(summary)
    }
}
