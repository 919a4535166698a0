//! Concurrency and session isolation tests.

use buffer_server::{BufferClient, BufferConfig, BufferError, Record, SessionStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn test_client(dir: &TempDir) -> BufferClient {
    BufferClient::new(BufferConfig::with_data_dir(dir.path())).unwrap()
}

#[test]
fn test_sessions_record_concurrently() {
    let dir = TempDir::new().unwrap();
    let client = test_client(&dir);

    let sessions: Vec<_> = (0..4)
        .map(|s| client.start(&["a", "b"], &format!("session_{s}.db")).unwrap())
        .collect();

    let writers: Vec<_> = sessions
        .iter()
        .enumerate()
        .map(|(s, &handle)| {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let record = Record::new(vec![s as f64, i as f64], i as f64);
                    client.append(handle, record).unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    for (s, &handle) in sessions.iter().enumerate() {
        let records = client.get_data(handle, None, None).unwrap();
        assert_eq!(records.len(), 200);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.data, vec![s as f64, i as f64]);
        }
    }
}

#[test]
fn test_concurrent_callers_on_one_session() {
    let dir = TempDir::new().unwrap();
    let client = test_client(&dir);
    let handle = client.start(&["writer", "seq"], "shared.db").unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    client
                        .append(handle, Record::new(vec![w as f64, i as f64], 0.0))
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    let records = client.get_data(handle, None, None).unwrap();
    assert_eq!(records.len(), 400);

    // Interleaving across callers is arbitrary, but each caller's own
    // appends keep their issue order
    for w in 0..4 {
        let sequence: Vec<f64> = records
            .iter()
            .filter(|r| r.data[0] == w as f64)
            .map(|r| r.data[1])
            .collect();
        let expected: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(sequence, expected);
    }
}

#[test]
fn test_reads_observe_every_returned_append() {
    let dir = TempDir::new().unwrap();
    let client = test_client(&dir);
    let handle = client.start(&["x"], "visible.db").unwrap();

    let reader = {
        let client = client.clone();
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..200 {
                let count = client.count(handle).unwrap();
                assert!(count >= last, "count went backwards");
                last = count;
            }
        })
    };

    for i in 0..300 {
        client.append(handle, Record::new(vec![i as f64], i as f64)).unwrap();
        let latest = client.get_data(handle, Some(i), None).unwrap();
        assert_eq!(latest, vec![Record::new(vec![i as f64], i as f64)]);
    }

    reader.join().unwrap();
}

#[test]
fn test_stop_does_not_disturb_other_sessions() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(test_client(&dir));

    let keep = client.start(&["x"], "keep.db").unwrap();
    let writer = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            for i in 0..300 {
                client.append(keep, Record::new(vec![i as f64], 0.0)).unwrap();
            }
        })
    };

    for round in 0..10 {
        let transient = client.start(&["y"], &format!("transient_{round}.db")).unwrap();
        client.append(transient, Record::new(vec![1.0], 0.0)).unwrap();
        client.stop(transient).unwrap();
    }

    writer.join().unwrap();
    assert_eq!(client.count(keep).unwrap(), 300);
}

#[test]
fn test_stop_finishes_appends_queued_before_it() {
    let dir = TempDir::new().unwrap();
    let client = test_client(&dir);
    let handle = client.start(&["writer", "seq"], "racing.db").unwrap();
    let path = client.info(handle).unwrap().storage_path;

    let writers = 8;
    let acked_total = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(writers + 1));

    let threads: Vec<_> = (0..writers)
        .map(|w| {
            let client = client.clone();
            let acked_total = Arc::clone(&acked_total);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut acked = Vec::new();
                for i in 0.. {
                    let record = Record::new(vec![w as f64, i as f64], 0.0);
                    match client.append(handle, record) {
                        Ok(()) => {
                            acked.push(i as f64);
                            acked_total.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            assert!(
                                matches!(
                                    e,
                                    BufferError::SessionClosed(_) | BufferError::UnknownSession(_)
                                ),
                                "unexpected rejection: {e}"
                            );
                            break;
                        }
                    }
                }
                acked
            })
        })
        .collect();

    barrier.wait();
    while acked_total.load(Ordering::SeqCst) < 100 {
        thread::sleep(Duration::from_millis(1));
    }
    client.stop(handle).unwrap();

    let acked: Vec<Vec<f64>> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    let (mut store, _) = SessionStore::recover(&path, 1).unwrap();
    let stored = store.read(None, None).unwrap();
    assert_eq!(stored.len(), acked.iter().map(Vec::len).sum::<usize>());

    // Every acknowledged append is stored, in its writer's order
    for (w, sequence) in acked.iter().enumerate() {
        let kept: Vec<f64> = stored
            .iter()
            .filter(|r| r.data[0] == w as f64)
            .map(|r| r.data[1])
            .collect();
        assert_eq!(&kept, sequence);
    }
}
