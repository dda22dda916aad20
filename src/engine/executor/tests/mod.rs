#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::task::{BoxError, RetryPolicy};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    // Mock task for testing
    struct MockTask {
        should_fail: bool,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl MockTask {
        fn new(should_fail: bool) -> Self {
            Self {
                should_fail,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                delay: Duration::from_millis(10),
            }
        }
    }

    #[async_trait]
    impl Task for MockTask {
        async fn execute(&self, args: &Arguments, progress: &Progress) -> std::result::Result<Value, BoxError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            progress.update(0.5, None);
            if self.should_fail {
                return Err("Task failed deliberately".into());
            }
            Ok(args.get("x").cloned().unwrap_or(Value::Null))
        }

        async fn revert(
            &self,
            _args: &Arguments,
            outcome: &Outcome,
            _progress: &Progress,
        ) -> std::result::Result<(), BoxError> {
            match outcome {
                Ok(_) => Ok(()),
                Err(_) => Err("cannot undo a failure".into()),
            }
        }
    }

    struct PanicTask;

    #[async_trait]
    impl Task for PanicTask {
        async fn execute(&self, _args: &Arguments, _progress: &Progress) -> std::result::Result<Value, BoxError> {
            panic!("boom");
        }
    }

    fn args(x: Value) -> Arguments {
        let mut args = Arguments::new();
        args.insert("x".into(), x);
        args
    }

    #[tokio::test]
    async fn test_execute_returns_result() {
        let executor = LocalExecutor::new(Some(2));
        let atom = Atom::task("a", MockTask::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let completion = executor
            .execute_task(&atom, args(json!(5)), Progress::new("a", tx))
            .await
            .await;

        assert_eq!(completion.atom, "a");
        assert_eq!(completion.action, Action::Execute);
        assert_eq!(completion.outcome, Ok(json!(5)));
        assert_eq!(rx.recv().await.map(|e| e.progress), Some(0.5));
    }

    #[tokio::test]
    async fn test_errors_become_failures() {
        let executor = LocalExecutor::default();
        let atom = Atom::task("a", MockTask::new(true));

        let completion = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("a"))
            .await
            .await;
        let failure = completion.outcome.unwrap_err();
        assert_eq!(failure.exception_str(), "Task failed deliberately");
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let executor = LocalExecutor::default();
        let atom = Atom::task("p", PanicTask);

        let completion = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("p"))
            .await
            .await;
        let failure = completion.outcome.unwrap_err();
        assert!(failure.check(&["Panic"]).is_some());
        assert!(failure.exception_str().contains("boom"));
    }

    #[tokio::test]
    async fn test_revert_receives_outcome() {
        let executor = LocalExecutor::default();
        let atom = Atom::task("a", MockTask::new(false));

        let ok = executor
            .revert_task(&atom, Arguments::new(), Ok(Value::Null), Progress::detached("a"))
            .await
            .await;
        assert_eq!(ok.action, Action::Revert);
        assert!(ok.outcome.is_ok());

        let failed = executor
            .revert_task(
                &atom,
                Arguments::new(),
                Err(Failure::new("ValueError", "earlier")),
                Progress::detached("a"),
            )
            .await
            .await;
        assert!(failed.outcome.is_err());
    }

    #[tokio::test]
    async fn test_max_workers_bounds_concurrency() {
        let executor = LocalExecutor::new(Some(2));
        let task = MockTask::new(false);
        let peak = task.peak.clone();
        let task: Arc<dyn Task> = Arc::new(task);

        let mut futures = Vec::new();
        for i in 0..6 {
            let atom = Atom::from_task(format!("a{}", i), task.clone());
            futures.push(
                executor
                    .execute_task(&atom, Arguments::new(), Progress::detached(atom.name()))
                    .await,
            );
        }
        let completions = futures::future::join_all(futures).await;

        assert_eq!(completions.len(), 6);
        assert!(completions.iter().all(|c| c.outcome.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_retry_atoms_are_refused() {
        let executor = LocalExecutor::default();
        let atom = Atom::retry("r", RetryPolicy::default());
        let completion = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("r"))
            .await
            .await;
        assert!(completion.outcome.unwrap_err().check(&["InvalidState"]).is_some());
    }
}
