//! Keyed single-flight execution: concurrent callers of the same key share
//! one run of the work and its outcome. The slot is cleaned up whether the
//! work succeeds, fails or its leader is cancelled; an abandoned flight is
//! simply re-led by the next caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

pub struct Group<T: Clone> {
    flights: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T: Clone> Default for Group<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Group<T> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` under `key`, or join an in-flight run and share its
    /// outcome. `make` is only invoked by the leader.
    pub async fn work<F, Fut>(&self, key: &str, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        enum Branch<T> {
            Join(watch::Receiver<Option<T>>),
            Lead(watch::Sender<Option<T>>),
        }

        let mut make = Some(make);
        loop {
            let branch = {
                let mut flights = self.flights.lock().expect("single-flight lock poisoned");
                match flights.get(key) {
                    Some(rx) => Branch::Join(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        flights.insert(key.to_string(), rx);
                        Branch::Lead(tx)
                    }
                }
            };

            let joined = match branch {
                Branch::Lead(tx) => {
                    // Leader path: run the work, publish, clean up. The
                    // guard removes the slot even if the future is
                    // cancelled mid-flight, so joiners retake the lead.
                    let _cleanup = FlightGuard { group: self, key };
                    let result = (make.take().expect("leader runs once"))().await;
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
                Branch::Join(rx) => Some(rx),
            };

            if let Some(mut rx) = joined {
                loop {
                    if let Some(result) = rx.borrow().clone() {
                        return result;
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                // Sender gone: take the final value if one was published,
                // otherwise the leader was cancelled and we retry.
                if let Some(result) = rx.borrow().clone() {
                    return result;
                }
            }
        }
    }
}

struct FlightGuard<'a, T: Clone> {
    group: &'a Group<T>,
    key: &'a str,
}

impl<T: Clone> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.group
            .flights
            .lock()
            .expect("single-flight lock poisoned")
            .remove(self.key);
    }
}
