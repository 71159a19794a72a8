#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::run::{CancelHandle, RunContext, RunState};

    #[test]
    fn context__starts_idle() {
        let ctx = RunContext::new();
        assert_eq!(ctx.state(), RunState::Idle);
        assert!(!ctx.is_busy());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn begin__second_claim_is_rejected() {
        let ctx = RunContext::new();
        let guard = ctx.begin(RunState::Checking).unwrap();

        assert!(ctx.is_busy());
        assert!(ctx.begin(RunState::SelfTesting).is_none());
        assert_eq!(ctx.state(), RunState::Checking);

        drop(guard);
        assert_eq!(ctx.state(), RunState::Idle);
        assert!(ctx.begin(RunState::SelfTesting).is_some());
    }

    #[test]
    fn begin__discards_stale_cancel() {
        let ctx = RunContext::new();
        ctx.request_cancel();
        assert!(ctx.is_cancelled());

        let guard = ctx.begin(RunState::Checking).unwrap();
        assert!(!guard.is_cancelled());

        ctx.request_cancel();
        assert!(guard.is_cancelled());
    }

    #[test]
    fn guard__releases_on_panic() {
        let ctx = Arc::new(RunContext::new());
        let ctx2 = Arc::clone(&ctx);

        let outcome = thread::spawn(move || {
            let _guard = ctx2.begin(RunState::Checking).unwrap();
            panic!("run blew up");
        })
        .join();

        assert!(outcome.is_err());
        assert_eq!(ctx.state(), RunState::Idle);
    }

    #[test]
    fn begin__only_one_thread_wins() {
        let ctx = Arc::new(RunContext::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let guard = ctx.begin(RunState::Checking);
                    let won = guard.is_some();
                    // Hold the claim until everyone has tried.
                    barrier.wait();
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
        assert!(!ctx.is_busy());
    }

    #[test]
    fn cancel_handle__reaches_shared_context() {
        let ctx = Arc::new(RunContext::new());
        let handle = CancelHandle::new(Arc::clone(&ctx));

        let guard = ctx.begin(RunState::SelfTesting).unwrap();
        assert!(handle.is_busy());

        let remote = handle.clone();
        thread::spawn(move || remote.cancel()).join().unwrap();

        assert!(guard.is_cancelled());
    }
}
