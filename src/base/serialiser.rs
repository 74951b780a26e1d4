//! Process-wide named serialisation locks
//!
//! Some third-party decoders are not reentrant and must never run
//! concurrently, even across unrelated readers. A `Serialiser` acquires a
//! process-wide mutex identified by an opaque name for as long as it lives.
//! Entries in the registry are reference-counted and removed once the last
//! holder of a name goes away.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

struct LockEntry {
    locked: Mutex<bool>,
    cond: Condvar,
}

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<LockEntry>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Holds the named process-wide lock from construction until drop.
pub struct Serialiser {
    id: String,
    entry: Arc<LockEntry>,
}

impl Serialiser {
    /// Acquire the lock named `id`, blocking until it is free.
    pub fn new(id: &str) -> Self {
        let entry = {
            let mut registry = REGISTRY.lock().unwrap();
            registry
                .entry(id.to_string())
                .or_insert_with(|| {
                    Arc::new(LockEntry {
                        locked: Mutex::new(false),
                        cond: Condvar::new(),
                    })
                })
                .clone()
        };

        debug!("Serialiser: waiting on \"{}\"", id);
        let mut locked = entry.locked.lock().unwrap();
        while *locked {
            locked = entry.cond.wait(locked).unwrap();
        }
        *locked = true;
        drop(locked);
        debug!("Serialiser: acquired \"{}\"", id);

        Serialiser {
            id: id.to_string(),
            entry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Serialiser {
    fn drop(&mut self) {
        {
            let mut locked = self.entry.locked.lock().unwrap();
            *locked = false;
        }
        self.entry.cond.notify_one();

        let mut registry = REGISTRY.lock().unwrap();
        // The registry holds one reference, we hold another; anything more
        // means another Serialiser still wants this name.
        if Arc::strong_count(&self.entry) <= 2 {
            registry.remove(&self.id);
        }
        debug!("Serialiser: released \"{}\"", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    #[serial]
    fn test_exclusion_within_name() {
        static CONCURRENT: AtomicUsize = AtomicUsize::new(0);
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(thread::spawn(|| {
                let _guard = Serialiser::new("test-exclusion");
                let n = CONCURRENT.fetch_add(1, Ordering::SeqCst);
                assert_eq!(n, 0, "two holders of the same name at once");
                thread::sleep(Duration::from_millis(10));
                CONCURRENT.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    #[serial]
    fn test_distinct_names_do_not_block() {
        let _a = Serialiser::new("name-a");
        // would deadlock if names shared a lock
        let _b = Serialiser::new("name-b");
        assert_eq!(_a.id(), "name-a");
        assert_eq!(_b.id(), "name-b");
    }

    #[test]
    #[serial]
    fn test_registry_entry_released() {
        {
            let _guard = Serialiser::new("transient");
        }
        let registry = REGISTRY.lock().unwrap();
        assert!(!registry.contains_key("transient"));
    }
}
