//! Stress tests for the reclamation protocol
//!
//! Readers sweep the key space while the single writer toggles random keys
//! and batches unlinked nodes for deferred destruction. At shutdown every
//! unlinked node must have been freed exactly once.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use quiesce::{List, Node, Rcu, Reader};
use rand::Rng;

const NUM_READERS: usize = 15;
const KEY_SPACE: u32 = 1024;
const TOGGLES: usize = 200_000;
const RETIRE_BATCH: usize = 1024;

/// Defer destruction of a batch of unlinked nodes, counting each free.
fn retire_batch(rcu: &Rcu, batch: Vec<usize>, freed: &Arc<AtomicUsize>) {
    if batch.is_empty() {
        return;
    }
    let freed = Arc::clone(freed);
    rcu.defer(move || {
        let count = batch.len();
        for addr in batch {
            // SAFETY: each address is an unlinked node that appears in
            // exactly one batch.
            unsafe { drop(Box::from_raw(addr as *mut Node)) };
        }
        freed.fetch_add(count, Ordering::SeqCst);
    })
    .unwrap();
}

#[test]
fn toggle_storm_frees_every_unlinked_node_once() {
    let rcu = Arc::new(Rcu::new());
    let list = Arc::new(List::new());
    let done = Arc::new(AtomicBool::new(false));
    let freed = Arc::new(AtomicUsize::new(0));

    rcu.start_background();

    let mut readers = vec![];
    for _ in 0..NUM_READERS {
        let reader = Arc::new(Reader::new());
        rcu.register(&reader).unwrap();
        readers.push(reader);
    }

    let start = Instant::now();

    let mut handles = vec![];
    for reader in &readers {
        let reader = Arc::clone(reader);
        let list = Arc::clone(&list);
        let done = Arc::clone(&done);

        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut lookups = 0usize;
            let mut rounds = 0usize;

            while !done.load(Ordering::Relaxed) {
                let section = reader.enter();
                for _ in 0..64 {
                    let key = rng.gen_range(0..KEY_SPACE);
                    let _ = list.lookup(key, &section);
                    lookups += 1;
                }

                // Periodically walk the whole chain and check the
                // sorted-unique invariant from inside a section.
                rounds += 1;
                if rounds % 256 == 0 {
                    let mut prev = None;
                    for key in list.iter(&section) {
                        if let Some(prev) = prev {
                            assert!(prev < key, "chain out of order: {prev} !< {key}");
                        }
                        prev = Some(key);
                    }
                }
                drop(section);
            }

            lookups
        }));
    }

    // Single writer: toggle random keys, batching unlinked nodes.
    let mut rng = rand::thread_rng();
    let mut batch = Vec::with_capacity(RETIRE_BATCH);
    let mut removed = 0usize;

    for _ in 0..TOGGLES {
        let key = rng.gen_range(0..KEY_SPACE);
        if let Some(node) = list.toggle(key) {
            batch.push(node.as_ptr() as usize);
            removed += 1;
            if batch.len() == RETIRE_BATCH {
                retire_batch(&rcu, mem::take(&mut batch), &freed);
            }
        }
    }
    retire_batch(&rcu, batch, &freed);

    done.store(true, Ordering::Relaxed);
    let mut total_lookups = 0usize;
    for handle in handles {
        total_lookups += handle.join().unwrap();
    }
    for reader in &readers {
        rcu.unregister(reader);
    }

    // With every reader quiescent, shutdown drains all batches.
    rcu.stop_background();
    assert_eq!(
        freed.load(Ordering::SeqCst),
        removed,
        "every unlinked node must be freed exactly once"
    );

    let elapsed = start.elapsed();
    println!("Toggle storm:");
    println!("  {TOGGLES} toggles, {removed} unlinks, {total_lookups} lookups in {elapsed:?}");
    println!(
        "  Throughput: {:.0} toggles/sec",
        TOGGLES as f64 / elapsed.as_secs_f64()
    );
    // Remaining nodes are freed by the list's teardown walk.
}

#[test]
fn reader_churn_does_not_stall_reclamation() {
    // Readers register, run a few sections, and unregister, over and over,
    // while the writer keeps feeding the reclaimer.
    const CHURNERS: usize = 4;
    const GENERATIONS: usize = 50;

    let rcu = Arc::new(Rcu::new());
    let list = Arc::new(List::new());
    let freed = Arc::new(AtomicUsize::new(0));

    rcu.start_background();

    let mut handles = vec![];
    for _ in 0..CHURNERS {
        let rcu = Arc::clone(&rcu);
        let list = Arc::clone(&list);

        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..GENERATIONS {
                let reader = Arc::new(Reader::new());
                rcu.register(&reader).unwrap();
                for _ in 0..100 {
                    let section = reader.enter();
                    let key = rng.gen_range(0..KEY_SPACE);
                    let _ = list.lookup(key, &section);
                }
                rcu.unregister(&reader);
            }
        }));
    }

    let mut rng = rand::thread_rng();
    let mut removed = 0usize;
    for _ in 0..20_000 {
        let key = rng.gen_range(0..KEY_SPACE);
        if let Some(node) = list.toggle(key) {
            removed += 1;
            retire_batch(&rcu, vec![node.as_ptr() as usize], &freed);
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }

    rcu.stop_background();
    assert_eq!(freed.load(Ordering::SeqCst), removed);
    println!("Reader churn: {removed} unlinks reclaimed across registration churn");
}
