//! Walkthrough: a sorted set shared between one writer and many readers,
//! with unlinked nodes destroyed only after a grace period

use quiesce::{List, Rcu, Reader};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("Sorted set under RCU reclamation");
    println!("================================\n");

    // Single-threaded protocol tour.
    println!("Single-threaded tour:");
    {
        let rcu = Rcu::new();
        let reader = Arc::new(Reader::new());
        rcu.register(&reader).unwrap();
        rcu.start_background();

        let list = List::new();
        for key in [3, 1, 4, 1, 5] {
            match list.toggle(key) {
                None => println!("  toggle({key}) inserted"),
                Some(node) => {
                    println!("  toggle({key}) unlinked, retiring");
                    unsafe { rcu.retire(node.as_ptr()).unwrap() };
                }
            }
        }

        let section = reader.enter();
        let keys: Vec<u32> = list.iter(&section).collect();
        println!("  contents: {keys:?}");
        assert_eq!(keys, [3, 4, 5]);
        drop(section);

        rcu.stop_background();
        rcu.unregister(&reader);
        println!("  retired node freed during shutdown drain.");
    }

    // Readers sweeping while the writer toggles.
    println!("\nConcurrent run (4 readers, 20000 toggles):");
    {
        const KEY_SPACE: u32 = 256;

        let rcu = Arc::new(Rcu::new());
        let list = Arc::new(List::new());
        let done = Arc::new(AtomicBool::new(false));
        let freed = Arc::new(AtomicUsize::new(0));
        rcu.start_background();

        let mut handles = vec![];
        for _ in 0..4 {
            let reader = Arc::new(Reader::new());
            rcu.register(&reader).unwrap();

            let rcu = Arc::clone(&rcu);
            let list = Arc::clone(&list);
            let done = Arc::clone(&done);
            handles.push(thread::spawn(move || {
                let mut hits = 0usize;
                let mut key = 0u32;
                while !done.load(Ordering::Relaxed) {
                    let section = reader.enter();
                    if list.lookup(key, &section) {
                        hits += 1;
                    }
                    key = (key + 1) % KEY_SPACE;
                    drop(section);
                }
                rcu.unregister(&reader);
                hits
            }));
        }

        let start = Instant::now();
        let mut removed = 0usize;
        for i in 0..20_000u32 {
            if let Some(node) = list.toggle(i % KEY_SPACE) {
                removed += 1;
                let freed = Arc::clone(&freed);
                let addr = node.as_ptr() as usize;
                rcu.defer(move || {
                    unsafe { drop(Box::from_raw(addr as *mut quiesce::Node)) };
                    freed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }

        done.store(true, Ordering::Relaxed);
        let hits: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        rcu.stop_background();

        println!("  {removed} unlinks in {:?}, {hits} reader hits", start.elapsed());
        println!("  freed {} of {removed} unlinked nodes", freed.load(Ordering::SeqCst));
        assert_eq!(freed.load(Ordering::SeqCst), removed);
    }

    // Grace periods hold while a section is open.
    println!("\nGrace-period demonstration:");
    {
        let rcu = Rcu::new();
        let reader = Arc::new(Reader::new());
        rcu.register(&reader).unwrap();
        rcu.start_background();

        reader.lock();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        rcu.defer(move || flag.store(true, Ordering::SeqCst)).unwrap();

        thread::sleep(Duration::from_millis(50));
        println!("  in section: callback fired = {}", fired.load(Ordering::SeqCst));
        assert!(!fired.load(Ordering::SeqCst));

        reader.unlock();
        while !fired.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        println!("  after unlock: callback fired = true");

        rcu.stop_background();
        rcu.unregister(&reader);
    }

    println!("\nAll demonstrations completed.");
}
