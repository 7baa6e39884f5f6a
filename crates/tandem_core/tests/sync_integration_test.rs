//! Integration tests for multi-client sequencing

use tandem_core::document::Document;
use tandem_core::history::{HistoryStore, MemoryHistory, content_checksum, replay};
use tandem_core::ot::{Component, Operation};

/// Small deterministic generator so failures reproduce
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Simulated client replica that only learns about changes through history
struct Replica {
    client_id: String,
    content: String,
    revision: u64,
    next_seq: u64,
}

impl Replica {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            content: String::new(),
            revision: 0,
            next_seq: 1,
        }
    }

    /// Author a random in-range edit against the local content.
    fn author(&mut self, rng: &mut Lcg) -> Operation {
        const WORDS: [&str; 5] = ["a", "bc", "déf", "ẞ", "  "];
        let len = self.content.chars().count();
        let position = rng.below(len + 1);
        let max_delete = (len - position).min(4);

        let components = match rng.below(3) {
            0 => vec![Component::insert(position, WORDS[rng.below(WORDS.len())])],
            1 => vec![Component::delete(position, rng.below(max_delete + 1))],
            _ => vec![
                Component::delete(position, rng.below(max_delete + 1)),
                Component::insert(position, WORDS[rng.below(WORDS.len())]),
            ],
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        Operation::new("doc", self.client_id.clone(), seq, self.revision, components)
    }

    /// Fetch and replay everything committed after the local revision.
    fn catch_up(&mut self, store: &dyn HistoryStore) {
        let missed = store.get_operations("doc", self.revision).unwrap();
        let (content, revision) =
            replay("doc", std::mem::take(&mut self.content), self.revision, &missed).unwrap();
        self.content = content;
        self.revision = revision;
    }
}

#[test]
fn test_concurrent_clients_converge_through_history() {
    let store = MemoryHistory::new();
    let mut doc = Document::new("doc").with_snapshot_interval(7);
    let mut rng = Lcg(0x5eed);
    let mut replicas: Vec<Replica> = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|id| Replica::new(id))
        .collect();

    for _round in 0..40 {
        // Every replica authors against whatever it last synced.
        let mut pending: Vec<Operation> = Vec::new();
        for replica in replicas.iter_mut() {
            if rng.below(4) != 0 {
                pending.push(replica.author(&mut rng));
            }
        }

        while !pending.is_empty() {
            let op = pending.remove(rng.below(pending.len()));
            let before = doc.revision();
            let outcome = doc.submit(op, &store).unwrap();
            assert!(!outcome.duplicate);
            assert_eq!(outcome.revision(), before + 1);
        }

        // Only some replicas catch up each round, so bases drift apart.
        for replica in replicas.iter_mut() {
            if rng.below(3) != 0 {
                replica.catch_up(&store);
            }
        }
    }

    for replica in replicas.iter_mut() {
        replica.catch_up(&store);
        assert_eq!(replica.revision, doc.revision());
        assert_eq!(replica.content, doc.content());
    }

    let log = store.get_operations("doc", 0).unwrap();
    assert_eq!(log.len() as u64, doc.revision());
    let (replayed, _) = replay("doc", String::new(), 0, &log).unwrap();
    assert_eq!(replayed, doc.content());

    let reloaded = Document::load("doc", &store).unwrap();
    assert_eq!(reloaded.checksum(), doc.checksum());
}

#[test]
fn test_pairwise_commit_order_does_not_matter() {
    let mut rng = Lcg(42);

    for _ in 0..200 {
        let mut seed = Replica::new("seed");
        seed.content = "The quick brown fox".to_string();
        seed.revision = 1;

        let mut alice = Replica { client_id: "alice".to_string(), ..seed_copy(&seed) };
        let mut bob = Replica { client_id: "bob".to_string(), ..seed_copy(&seed) };
        let o1 = alice.author(&mut rng);
        let o2 = bob.author(&mut rng);

        let mut results = Vec::new();
        for (first, second) in [(&o1, &o2), (&o2, &o1)] {
            let store = MemoryHistory::new();
            let mut doc = Document::new("doc");
            doc.submit(
                Operation::new("doc", "seed", 1, 0, vec![Component::insert(0, seed.content.clone())]),
                &store,
            )
            .unwrap();
            doc.submit(first.clone(), &store).unwrap();
            doc.submit(second.clone(), &store).unwrap();
            results.push(doc.content().to_string());
        }

        assert_eq!(results[0], results[1], "diverged on {:?} / {:?}", o1, o2);
    }
}

fn seed_copy(seed: &Replica) -> Replica {
    Replica {
        client_id: seed.client_id.clone(),
        content: seed.content.clone(),
        revision: seed.revision,
        next_seq: seed.next_seq,
    }
}

#[test]
fn test_reconnecting_client_replays_missed_operations() {
    let store = MemoryHistory::new();
    let mut doc = Document::new("doc");
    let edits = [
        Component::insert(0, "Hello"),
        Component::insert(5, " World"),
        Component::delete(0, 1),
        Component::insert(0, "J"),
        Component::insert(11, "!"),
        Component::delete(5, 6),
    ];
    for (i, component) in edits.into_iter().enumerate() {
        let base = doc.revision();
        doc.submit(
            Operation::new("doc", "writer", i as u64 + 1, base, vec![component]),
            &store,
        )
        .unwrap();
    }

    // The client went offline at revision 3.
    let mut offline = Replica::new("reader");
    offline.content = doc.content_at(3, &store).unwrap();
    offline.revision = 3;
    assert_eq!(offline.content, "ello World");

    let missed = store.get_operations("doc", offline.revision).unwrap();
    assert_eq!(
        missed.iter().map(|e| e.revision).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );

    offline.catch_up(&store);
    assert_eq!(offline.content, doc.content());
    assert_eq!(offline.content, "Jello!");
    assert_eq!(content_checksum(&offline.content), doc.checksum());
}

#[test]
fn test_retry_after_storage_failure_applies_once() {
    let store = MemoryHistory::new();
    let mut doc = Document::new("doc");
    doc.submit(Operation::new("doc", "a", 1, 0, vec![Component::insert(0, "ab")]), &store)
        .unwrap();

    let op = Operation::new("doc", "b", 1, 1, vec![Component::insert(2, "c")]);
    store.fail_next_appends(2);
    assert!(doc.submit(op.clone(), &store).is_err());
    assert!(doc.submit(op.clone(), &store).is_err());
    assert_eq!(doc.content(), "ab");

    for _ in 0..3 {
        doc.submit(op.clone(), &store).unwrap();
    }
    assert_eq!(doc.content(), "abc");
    assert_eq!(store.latest_revision("doc").unwrap(), 2);
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_history_survives_restart() {
    use tandem_core::history::SqliteHistory;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");

    let expected = {
        let store = SqliteHistory::open(&path).unwrap();
        let mut doc = Document::new("doc").with_snapshot_interval(2);
        for seq in 1..=5u64 {
            let base = doc.revision();
            doc.submit(
                Operation::new("doc", "a", seq, base, vec![Component::insert(0, "xy")]),
                &store,
            )
            .unwrap();
        }
        doc.content().to_string()
    };

    let store = SqliteHistory::open(&path).unwrap();
    let mut doc = Document::load("doc", &store).unwrap();
    assert_eq!(doc.content(), expected);
    assert_eq!(doc.revision(), 5);

    let retried = doc
        .submit(Operation::new("doc", "a", 5, 4, vec![Component::insert(0, "xy")]), &store)
        .unwrap();
    assert!(retried.duplicate);
    assert_eq!(doc.revision(), 5);
}
