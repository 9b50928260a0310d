//! Bounded discovery of pointer chains over the reverse index.

use crate::pointer_index::{PointerIndex, PointerMap};
use crate::{Address, ModuleTable, Offset, Pointer, Size, Token};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::mpsc;

/// Limits and knobs for a chain discovery run.
#[derive(Debug, Clone)]
pub struct PointerScanOptions {
    /// Deepest chain level considered. A chain of level `n` has `n + 1`
    /// hop offsets, so this bounds offsets per chain too.
    pub max_level: usize,
    /// Largest hop displacement considered.
    pub max_offset: Size,
    /// Alignment required of indexed pointer values.
    pub alignment: Size,
    /// Abandon branches that revisit an address already on the chain.
    pub no_loop: bool,
    /// Give up on a node after this many distinct hop offsets.
    pub max_offsets_per_node: Option<usize>,
    /// Stop expanding a node deeper once it produced a static hit.
    pub only_one_static: bool,
    /// Treat the first `n` thread stacks as static roots.
    pub thread_stacks: usize,
    /// Index read-only regions as pointer holders too.
    pub include_readonly: bool,
}

impl Default for PointerScanOptions {
    fn default() -> Self {
        Self {
            max_level: 7,
            max_offset: Size::new(0x1000),
            alignment: Size::new(4),
            no_loop: true,
            max_offsets_per_node: None,
            only_one_static: false,
            thread_stacks: 2,
            include_readonly: false,
        }
    }
}

/// Receives progress updates during chain discovery.
pub trait PointerScanProgress {
    /// Report nodes visited and chains found since the last report.
    fn report(&mut self, visited: u64, results: u64) -> anyhow::Result<()>;
}

impl PointerScanProgress for () {
    fn report(&mut self, _: u64, _: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<P> PointerScanProgress for &mut P
where
    P: PointerScanProgress,
{
    fn report(&mut self, visited: u64, results: u64) -> anyhow::Result<()> {
        (**self).report(visited, results)
    }
}

/// A branch waiting to be expanded.
///
/// `target` is the address some holder must point into for the chain to
/// grow; `offsets` are the hops accumulated so far, innermost-first.
struct Node {
    target: Address,
    offsets: SmallVec<[Offset; 8]>,
    visited: SmallVec<[Address; 8]>,
}

enum Msg {
    Tick { visited: u64, results: u64 },
    Done(Vec<Pointer>),
}

const TICK_EVERY: u64 = 1024;

/// A bounded backwards search from a target address to static roots.
pub struct PointerScan<'a> {
    index: &'a PointerIndex,
    opts: &'a PointerScanOptions,
}

impl<'a> PointerScan<'a> {
    pub fn new(index: &'a PointerIndex, opts: &'a PointerScanOptions) -> Self {
        Self { index, opts }
    }

    /// Discover every chain from a static root to `target` within the
    /// configured limits.
    ///
    /// The level-0 branches are distributed over the pool, and each worker
    /// drains its own explicit work-stack, fanning chains and progress in
    /// over a channel drained on the calling thread. Cancellation is honored
    /// per popped node and returns the chains found so far.
    pub fn scan(
        &self,
        thread_pool: &rayon::ThreadPool,
        target: Address,
        cancel: Option<&Token>,
        mut progress: impl PointerScanProgress,
    ) -> anyhow::Result<Vec<Pointer>> {
        let root = Node {
            target,
            offsets: SmallVec::new(),
            visited: SmallVec::new(),
        };

        let mut results = Vec::new();
        let mut seeds = Vec::new();
        self.expand(root, target, &mut results, &mut seeds);

        let workers = thread_pool.current_num_threads().max(1);
        let mut buckets: Vec<Vec<Node>> = (0..workers).map(|_| Vec::new()).collect();

        for (n, seed) in seeds.into_iter().enumerate() {
            buckets[n % workers].push(seed);
        }

        let mut last_err = None;

        thread_pool.in_place_scope(|s| {
            let (tx, rx) = mpsc::channel::<Msg>();

            for bucket in buckets {
                let tx = tx.clone();

                s.spawn(move |_| {
                    let out = self.run_worker(bucket, target, cancel, &tx);
                    tx.send(Msg::Done(out)).expect("channel send failed");
                });
            }

            drop(tx);

            while let Ok(msg) = rx.recv() {
                let (visited, found) = match msg {
                    Msg::Tick { visited, results } => (visited, results),
                    Msg::Done(chains) => {
                        let found = chains.len() as u64;
                        results.extend(chains);
                        (0, found)
                    }
                };

                if let Err(e) = progress.report(visited, found) {
                    if let Some(token) = cancel {
                        token.set();
                    }

                    if last_err.is_none() {
                        last_err = Some(e);
                    }
                }
            }
        });

        if let Some(e) = last_err {
            return Err(e);
        }

        results.sort_by_key(|p| {
            (
                p.offsets.len(),
                p.module_index,
                p.base_offset,
                p.offsets.iter().map(|o| o.as_i64()).collect::<Vec<_>>(),
            )
        });

        log::info!("found {} chains onto {}", results.len(), target);
        Ok(results)
    }

    fn run_worker(
        &self,
        mut stack: Vec<Node>,
        target: Address,
        cancel: Option<&Token>,
        tx: &mpsc::Sender<Msg>,
    ) -> Vec<Pointer> {
        let mut out = Vec::new();
        let mut visited = 0u64;
        let mut last_results = 0u64;

        while let Some(node) = stack.pop() {
            if cancel.map(Token::is_set).unwrap_or(false) {
                break;
            }

            visited += 1;
            self.expand(node, target, &mut out, &mut stack);

            if visited % TICK_EVERY == 0 {
                let results = out.len() as u64 - last_results;
                last_results = out.len() as u64;

                // progress is best-effort once the receiver is gone
                let _ = tx.send(Msg::Tick {
                    visited: TICK_EVERY,
                    results,
                });
            }
        }

        out
    }

    /// Expand one node: walk candidate pointer values downwards from the
    /// node's target, record chains for static holders, and queue the rest.
    fn expand(&self, node: Node, target: Address, results: &mut Vec<Pointer>, queue: &mut Vec<Node>) {
        let level = node.offsets.len();

        if self.opts.no_loop && node.visited.contains(&node.target) {
            return;
        }

        let mut groups = 0usize;
        let mut found_static = false;

        for (value, entries) in self.index.candidates(node.target, self.opts.max_offset) {
            if level > 0 {
                if let Some(cap) = self.opts.max_offsets_per_node {
                    groups += 1;

                    if groups > cap {
                        break;
                    }
                }
            }

            let offset = node.target.offset_of(value);

            for entry in entries {
                if let Some(static_ref) = entry.static_ref {
                    let mut offsets = node.offsets.clone();
                    offsets.push(offset);

                    results.push(Pointer {
                        module_index: static_ref.module_index,
                        base_offset: static_ref.offset,
                        offsets: offsets.into_vec(),
                        points_to: target,
                    });

                    found_static = true;
                    continue;
                }

                if level + 1 >= self.opts.max_level {
                    continue;
                }

                if self.opts.only_one_static && found_static {
                    continue;
                }

                let mut offsets = node.offsets.clone();
                offsets.push(offset);

                let mut visited = node.visited.clone();
                visited.push(node.target);

                queue.push(Node {
                    target: entry.address,
                    offsets,
                    visited,
                });
            }
        }
    }

    /// Re-resolve stored chains against a fresh pointer map and keep the
    /// ones that still land on `new_target`.
    pub fn rescan(
        thread_pool: &rayon::ThreadPool,
        pointers: Vec<Pointer>,
        table: &ModuleTable,
        map: &PointerMap,
        new_target: Address,
    ) -> Vec<Pointer> {
        let mut kept: Vec<Pointer> = thread_pool.install(|| {
            pointers
                .into_par_iter()
                .filter_map(|mut p| match p.resolve(table, map) {
                    Some(address) if address == new_target => {
                        p.points_to = address;
                        Some(p)
                    }
                    _ => None,
                })
                .collect()
        });

        kept.sort_by_key(|p| {
            (
                p.offsets.len(),
                p.module_index,
                p.base_offset,
                p.offsets.iter().map(|o| o.as_i64()).collect::<Vec<_>>(),
            )
        });

        log::info!("{} chains still resolve onto {}", kept.len(), new_target);
        kept
    }
}
