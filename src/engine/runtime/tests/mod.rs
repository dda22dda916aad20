#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::engine::compiler::compile;
    use crate::engine::executor::LocalExecutor;
    use crate::flow::Flow;
    use crate::storage::MemoryStorage;
    use crate::task::{Arguments, BoxError, Outcome, RetryPolicy, Task};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        journal: Journal,
        fail: bool,
        fail_revert: bool,
    }

    impl Recorder {
        fn ok(journal: &Journal) -> Self {
            Self {
                journal: journal.clone(),
                fail: false,
                fail_revert: false,
            }
        }

        fn failing(journal: &Journal) -> Self {
            Self {
                fail: true,
                ..Self::ok(journal)
            }
        }
    }

    #[async_trait]
    impl Task for Recorder {
        async fn execute(&self, args: &Arguments, progress: &Progress) -> std::result::Result<Value, BoxError> {
            self.journal.lock().push(format!("execute {}", progress.atom()));
            if self.fail {
                return Err(format!("{} blew up", progress.atom()).into());
            }
            Ok(args.get("x").cloned().unwrap_or(Value::from(1)))
        }

        async fn revert(
            &self,
            _args: &Arguments,
            _outcome: &Outcome,
            progress: &Progress,
        ) -> std::result::Result<(), BoxError> {
            self.journal.lock().push(format!("revert {}", progress.atom()));
            if self.fail_revert {
                return Err("cannot undo".into());
            }
            Ok(())
        }
    }

    /// Fails its first `failures` executions.
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Flaky {
        async fn execute(&self, _args: &Arguments, _progress: &Progress) -> std::result::Result<Value, BoxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err("transient".into());
            }
            Ok(Value::from("done"))
        }
    }

    struct Suspender(SuspendHandle);

    #[async_trait]
    impl Task for Suspender {
        async fn execute(&self, _args: &Arguments, _progress: &Progress) -> std::result::Result<Value, BoxError> {
            self.0.suspend();
            Ok(Value::Null)
        }
    }

    async fn runtime_with(
        flow: &Flow,
        backend: &MemoryStorage,
        suspend: SuspendHandle,
    ) -> (Runtime, Arc<Storage>) {
        let compilation = Arc::new(compile(flow).unwrap());
        let storage = Arc::new(
            Storage::open(Arc::new(backend.clone()), "flow-1", flow.name())
                .await
                .unwrap(),
        );
        storage.bind(compilation.clone()).await.unwrap();
        let runtime = Runtime::new(
            compilation,
            storage.clone(),
            Arc::new(LocalExecutor::new(Some(4))),
            suspend,
        );
        (runtime, storage)
    }

    #[tokio::test]
    async fn test_linear_flow_succeeds() {
        let journal = Journal::default();
        let flow = Flow::linear("ok")
            .add(Atom::task("a", Recorder::ok(&journal)).with_provides(&["x"]))
            .add(Atom::task("b", Recorder::ok(&journal)).with_requires(&["x"]));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        assert_eq!(*journal.lock(), vec!["execute a", "execute b"]);
        assert_eq!(storage.get_atom_state("b").unwrap(), AtomState::Success);
        assert_eq!(storage.get_execute_result("b").unwrap(), Value::from(1));
        assert_eq!(storage.get_flow_state(), FlowState::Success);
    }

    #[tokio::test]
    async fn test_failure_reverts_in_reverse_order() {
        let journal = Journal::default();
        let flow = Flow::linear("revert")
            .add(Atom::task("a", Recorder::ok(&journal)))
            .add(Atom::task("b", Recorder::ok(&journal)))
            .add(Atom::task("c", Recorder::failing(&journal)));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        match runtime.run().await {
            Err(FlowError::Execution(wrapped)) => {
                assert_eq!(wrapped.len(), 1);
                assert!(wrapped.iter().all(|f| f.exception_str() == "c blew up"));
            }
            other => panic!("expected a reverted run, got {:?}", other),
        }
        assert_eq!(backend.atoms_reaching(AtomState::Reverted), vec!["c", "b", "a"]);
        assert_eq!(storage.get_flow_state(), FlowState::Reverted);
        assert!(storage.get_execute_failure("c").is_some());
    }

    #[tokio::test]
    async fn test_retry_absorbs_transient_failure() {
        let journal = Journal::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let flow = Flow::linear("retrying")
            .with_retry(Atom::retry("r", RetryPolicy::new(2, Duration::from_millis(0))))
            .add(Atom::task("a", Recorder::ok(&journal)))
            .add(Atom::task(
                "b",
                Flaky {
                    failures: 2,
                    calls: calls.clone(),
                },
            ));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *journal.lock(),
            vec![
                "execute a", "revert a", "execute a", "revert a", "execute a"
            ]
        );
        let history = storage.get_retry_history("r").unwrap();
        assert_eq!(history.len(), 3);
        assert!(storage.failures().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retry_reverts_everything() {
        let journal = Journal::default();
        let inner = Flow::linear("inner")
            .with_retry(Atom::retry("r", RetryPolicy::new(1, Duration::from_millis(0))))
            .add(Atom::task("b", Recorder::failing(&journal)));
        let flow = Flow::linear("outer")
            .add(Atom::task("a", Recorder::ok(&journal)))
            .add_flow(inner);
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        assert!(matches!(runtime.run().await, Err(FlowError::Execution(_))));
        let executions = journal
            .lock()
            .iter()
            .filter(|line| *line == "execute b")
            .count();
        assert_eq!(executions, 2);
        for name in ["a", "r", "b"] {
            assert_eq!(storage.get_atom_state(name).unwrap(), AtomState::Reverted);
        }
    }

    #[tokio::test]
    async fn test_revert_failure_fails_the_run() {
        let journal = Journal::default();
        let flow = Flow::linear("stuck")
            .add(Atom::task(
                "a",
                Recorder {
                    fail_revert: true,
                    ..Recorder::ok(&journal)
                },
            ))
            .add(Atom::task("b", Recorder::failing(&journal)));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        match runtime.run().await {
            Err(FlowError::Failed {
                failures,
                revert_failures,
            }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].exception_str(), "b blew up");
                assert_eq!(revert_failures.len(), 1);
                assert_eq!(revert_failures[0].exception_str(), "cannot undo");
            }
            other => panic!("expected a failed run, got {:?}", other),
        }
        assert_eq!(storage.get_atom_state("a").unwrap(), AtomState::RevertFailure);
        assert_eq!(storage.get_flow_state(), FlowState::Failure);
        assert!(matches!(runtime.run().await, Err(FlowError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_interrupted_atoms_are_resumed() {
        let journal = Journal::default();
        let flow = Flow::linear("resume")
            .add(Atom::task("a", Recorder::ok(&journal)))
            .add(Atom::task("b", Recorder::ok(&journal)));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;
        storage.save_result("a", Value::from(1)).await.unwrap();
        storage.set_atom_state("b", AtomState::Running).await.unwrap();

        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        assert_eq!(*journal.lock(), vec!["execute b"]);
    }

    #[tokio::test]
    async fn test_suspend_stops_new_work_and_resumes() {
        let journal = Journal::default();
        let suspend = SuspendHandle::new();
        let flow = Flow::linear("pausable")
            .add(Atom::task("a", Suspender(suspend.clone())))
            .add(Atom::task("b", Recorder::ok(&journal)));
        let backend = MemoryStorage::new();
        let (runtime, storage) = runtime_with(&flow, &backend, suspend.clone()).await;

        assert_eq!(runtime.run().await.unwrap(), FlowState::Suspended);
        assert_eq!(storage.get_atom_state("a").unwrap(), AtomState::Success);
        assert_eq!(storage.get_atom_intention("b").unwrap(), Intention::Ignore);
        assert!(journal.lock().is_empty());

        suspend.reset();
        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        assert_eq!(*journal.lock(), vec!["execute b"]);
    }

    #[tokio::test]
    async fn test_rerun_after_success_is_a_no_op() {
        let journal = Journal::default();
        let flow = Flow::linear("once").add(Atom::task("a", Recorder::ok(&journal)));
        let backend = MemoryStorage::new();
        let (runtime, _storage) = runtime_with(&flow, &backend, SuspendHandle::new()).await;

        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        let saves = backend.get_save_calls().len();
        assert_eq!(runtime.run().await.unwrap(), FlowState::Success);
        assert_eq!(backend.get_save_calls().len(), saves);
        assert_eq!(journal.lock().len(), 1);
    }
}
