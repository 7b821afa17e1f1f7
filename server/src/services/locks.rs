use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Serializes state-changing operations per ticket. Operations on different
/// tickets never wait on each other.
#[derive(Clone, Default)]
pub struct TicketLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TicketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, ticket_id: Uuid) -> TicketGuard {
        let lock = self
            .locks
            .entry(ticket_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        TicketGuard {
            ticket_id,
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

pub struct TicketGuard {
    ticket_id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the mutex once nobody is waiting on it.
        self.locks
            .remove_if(&self.ticket_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_ticket_is_serialized() {
        let locks = TicketLocks::new();
        let ticket = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(ticket).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_tickets_do_not_block() {
        let locks = TicketLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }
}
