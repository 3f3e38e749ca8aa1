//! Serialisation of tier status checks.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

type StatusCheck = Shared<BoxFuture<'static, Option<bool>>>;

/// Holds the one status check currently in flight.
///
/// A caller arriving while a check runs waits for it, then runs its own check
/// instead of taking the older answer. Every caller therefore sees a result
/// from a request that started after it asked.
#[derive(Default)]
pub(crate) struct StatusGate {
    in_flight: Mutex<Option<StatusCheck>>,
}

impl StatusGate {
    fn slot(&self) -> MutexGuard<'_, Option<StatusCheck>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `check` from the slot if it is still the registered one.
    fn release(&self, check: &StatusCheck) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(check)) {
            *slot = None;
        }
    }

    /// Run `check` once no other check is in flight.
    pub(crate) async fn run(&self, check: BoxFuture<'static, Option<bool>>) -> Option<bool> {
        let mine = check.shared();
        loop {
            let previous = {
                let mut slot = self.slot();
                match slot.as_ref() {
                    Some(previous) => previous.clone(),
                    None => {
                        *slot = Some(mine.clone());
                        break;
                    }
                }
            };
            previous.clone().await;
            // its owner may not have cleared the slot yet
            self.release(&previous);
        }

        let result = mine.clone().await;
        self.release(&mine);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn counting_check(
        counter: &Arc<AtomicUsize>,
        log: &Arc<Mutex<Vec<String>>>,
        answer: bool,
    ) -> BoxFuture<'static, Option<bool>> {
        let counter = Arc::clone(counter);
        let log = Arc::clone(log);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            log.lock().unwrap().push(format!("start {n}"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            log.lock().unwrap().push(format!("end {n}"));
            Some(answer)
        }
        .boxed()
    }

    #[tokio::test]
    async fn overlapping_checks_run_back_to_back() {
        let gate = StatusGate::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b, c) = tokio::join!(
            gate.run(counting_check(&counter, &log, false)),
            gate.run(counting_check(&counter, &log, true)),
            gate.run(counting_check(&counter, &log, true)),
        );

        assert_eq!((a, b, c), (Some(false), Some(true), Some(true)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["start 1", "end 1", "start 2", "end 2", "start 3", "end 3"]
        );
        assert!(gate.slot().is_none());
    }

    #[tokio::test]
    async fn sequential_checks_do_not_wait() {
        let gate = StatusGate::default();
        assert_eq!(gate.run(async { Some(true) }.boxed()).await, Some(true));
        assert_eq!(gate.run(async { None }.boxed()).await, None);
        assert!(gate.slot().is_none());
    }
}
