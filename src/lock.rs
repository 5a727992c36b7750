use crate::sync::{Condvar, Mutex};
use crate::Context;

#[derive(Debug, Default)]
struct TokenState {
    holder: Option<Context>,
    next_ticket: u64,
    now_serving: u64,
}

/// Cross-context mutual-exclusion token shared by the two logical contexts
/// of a tile.
///
/// Acquisition is granted in strict request order. The token may be held
/// across a suspension point (a locked miss), which serializes the sibling
/// context for the duration. Misuse — re-acquiring a held token or
/// releasing one that is not held — is a protocol bug in the caller and
/// terminates the simulation.
#[derive(Debug, Default)]
pub struct CrossContextLock {
    state: Mutex<TokenState>,
    cv: Condvar,
}

impl CrossContextLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, ctx: Context) {
        let mut state = self.state.lock();
        assert!(
            state.holder != Some(ctx),
            "context {ctx} requested the cross-context token it already holds"
        );
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.now_serving != ticket {
            self.cv.wait(&mut state);
        }
        debug_assert!(state.holder.is_none());
        state.holder = Some(ctx);
    }

    pub fn release(&self, ctx: Context) {
        let mut state = self.state.lock();
        assert_eq!(
            state.holder,
            Some(ctx),
            "context {ctx} released the cross-context token without holding it"
        );
        state.holder = None;
        state.now_serving += 1;
        self.cv.notify_all();
    }

    #[must_use]
    pub fn holder(&self) -> Option<Context> {
        self.state.lock().holder
    }
}

#[cfg(test)]
mod tests {
    use super::CrossContextLock;
    use crate::sync::Arc;
    use crate::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn acquire_release_round_trip() {
        let token = CrossContextLock::new();
        token.acquire(Context::Main);
        assert_eq!(token.holder(), Some(Context::Main));
        token.release(Context::Main);
        assert_eq!(token.holder(), None);
        token.acquire(Context::Companion);
        token.release(Context::Companion);
    }

    #[test]
    fn contexts_never_hold_the_token_together() {
        let token = Arc::new(CrossContextLock::new());
        let in_critical = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = [Context::Main, Context::Companion]
            .into_iter()
            .map(|ctx| {
                let token = Arc::clone(&token);
                let in_critical = Arc::clone(&in_critical);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        token.acquire(ctx);
                        assert_eq!(in_critical.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(token.holder(), Some(ctx));
                        assert_eq!(in_critical.fetch_sub(1, Ordering::SeqCst), 1);
                        token.release(ctx);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn double_acquire_is_fatal() {
        let token = CrossContextLock::new();
        token.acquire(Context::Main);
        token.acquire(Context::Main);
    }

    #[test]
    #[should_panic(expected = "without holding it")]
    fn release_without_acquire_is_fatal() {
        let token = CrossContextLock::new();
        token.release(Context::Companion);
    }
}
