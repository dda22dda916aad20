#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::engine::compiler::compile;
    use crate::flow::Flow;
    use crate::storage::MemoryStorage;
    use crate::task::example_task::HiTask;
    use crate::task::RetryPolicy;
    use std::sync::Arc;

    async fn setup(flow: Flow) -> (Arc<Compilation>, Storage) {
        let compilation = Arc::new(compile(&flow).unwrap());
        let storage = Storage::open(Arc::new(MemoryStorage::new()), "f", flow.name())
            .await
            .unwrap();
        storage.bind(compilation.clone()).await.unwrap();
        (compilation, storage)
    }

    fn diamond() -> Flow {
        Flow::graph("diamond")
            .add(Atom::task("a", HiTask).with_provides(&["x"]))
            .add(Atom::task("b", HiTask).with_requires(&["x"]).with_provides(&["y"]))
            .add(Atom::task("c", HiTask).with_requires(&["x"]).with_provides(&["z"]))
            .add(Atom::task("d", HiTask).with_requires(&["y", "z"]))
    }

    fn next(compilation: &Compilation, storage: &Storage) -> Vec<String> {
        let mut found: Vec<String> = Analyzer::new(compilation, storage)
            .iter_next_atoms()
            .map(|a| a.name().to_string())
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_next_atoms_follow_dependencies() {
        let (compilation, storage) = setup(diamond()).await;
        assert_eq!(next(&compilation, &storage), vec!["a"]);

        storage.set_atom_state("a", AtomState::Running).await.unwrap();
        assert!(next(&compilation, &storage).is_empty());

        storage.set_atom_state("a", AtomState::Success).await.unwrap();
        assert_eq!(next(&compilation, &storage), vec!["b", "c"]);

        storage.set_atom_state("b", AtomState::Success).await.unwrap();
        assert_eq!(next(&compilation, &storage), vec!["c"]);

        storage.set_atom_state("c", AtomState::Success).await.unwrap();
        assert_eq!(next(&compilation, &storage), vec!["d"]);
    }

    #[tokio::test]
    async fn test_ignored_atoms_are_not_scheduled() {
        let (compilation, storage) = setup(diamond()).await;
        storage
            .set_atom_intention("a", Intention::Ignore)
            .await
            .unwrap();
        assert!(next(&compilation, &storage).is_empty());
    }

    #[tokio::test]
    async fn test_revert_waits_for_successors() {
        let (compilation, storage) = setup(diamond()).await;
        for name in ["a", "b", "c"] {
            storage.set_atom_state(name, AtomState::Success).await.unwrap();
        }
        storage.set_atom_state("d", AtomState::Failure).await.unwrap();
        for name in ["a", "b", "c", "d"] {
            storage.set_atom_intention(name, Intention::Revert).await.unwrap();
        }

        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(analyzer.is_ready_to_revert("d"));
        assert!(!analyzer.is_ready_to_revert("b"));
        assert!(!analyzer.is_ready_to_revert("a"));

        storage.set_atom_state("d", AtomState::Reverted).await.unwrap();
        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(analyzer.is_ready_to_revert("b"));
        assert!(analyzer.is_ready_to_revert("c"));
        assert!(!analyzer.is_ready_to_revert("a"));

        storage.set_atom_state("b", AtomState::Reverting).await.unwrap();
        storage.set_atom_state("c", AtomState::Reverted).await.unwrap();
        assert!(!Analyzer::new(&compilation, &storage).is_ready_to_revert("a"));

        storage.set_atom_state("b", AtomState::Reverted).await.unwrap();
        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(analyzer.is_ready_to_revert("a"));
        assert_eq!(
            analyzer
                .get_next_work()
                .into_iter()
                .map(|(atom, action)| (atom.name().to_string(), action))
                .collect::<Vec<_>>(),
            vec![("a".to_string(), Action::Revert)]
        );
    }

    #[tokio::test]
    async fn test_pending_successors_do_not_block_revert() {
        let (compilation, storage) = setup(diamond()).await;
        storage.set_atom_state("a", AtomState::Success).await.unwrap();
        storage.set_atom_state("b", AtomState::Failure).await.unwrap();
        for name in ["a", "b", "c", "d"] {
            storage.set_atom_intention(name, Intention::Revert).await.unwrap();
        }
        let analyzer = Analyzer::new(&compilation, &storage);
        let ready: Vec<&str> = analyzer.iter_atoms_to_revert().map(|a| a.name()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[tokio::test]
    async fn test_browse_atoms_to_revert_is_latest_first() {
        let flow = Flow::linear("lin")
            .add(Atom::task("a", HiTask))
            .add(Atom::task("b", HiTask))
            .add(Atom::task("c", HiTask))
            .add(Atom::task("d", HiTask));
        let (compilation, storage) = setup(flow).await;
        storage.set_atom_state("a", AtomState::Success).await.unwrap();
        storage.set_atom_state("b", AtomState::Success).await.unwrap();
        storage.set_atom_state("c", AtomState::Failure).await.unwrap();

        let analyzer = Analyzer::new(&compilation, &storage);
        let order: Vec<&str> = analyzer
            .browse_atoms_to_revert()
            .into_iter()
            .map(|a| a.name())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_retry_subflow_and_reset() {
        let sub = Flow::linear("sub")
            .with_retry(Atom::retry("r", RetryPolicy::new(1, Default::default())))
            .add(Atom::task("b", HiTask))
            .add(Atom::task("c", HiTask));
        let flow = Flow::linear("outer").add(Atom::task("a", HiTask)).add_flow(sub);
        let (compilation, storage) = setup(flow).await;

        let analyzer = Analyzer::new(&compilation, &storage);
        let subflow: Vec<&str> = analyzer.iter_retry_subflow("r").map(|a| a.name()).collect();
        assert_eq!(subflow, vec!["b", "c"]);

        for name in ["a", "r"] {
            storage.set_atom_state(name, AtomState::Success).await.unwrap();
        }
        storage.set_atom_state("b", AtomState::Failure).await.unwrap();
        storage.set_atom_intention("r", Intention::Retry).await.unwrap();
        storage.set_atom_intention("b", Intention::Revert).await.unwrap();
        storage.set_atom_intention("c", Intention::Revert).await.unwrap();
        assert!(!Analyzer::new(&compilation, &storage).is_ready_to_reset("r"));

        storage.set_atom_state("b", AtomState::Reverted).await.unwrap();
        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(analyzer.is_ready_to_reset("r"));
        let resettable: Vec<&str> = analyzer.iter_retries_to_reset().map(|a| a.name()).collect();
        assert_eq!(resettable, vec!["r"]);
    }

    #[tokio::test]
    async fn test_outcome_predicates() {
        let (compilation, storage) = setup(diamond()).await;
        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(!analyzer.is_success());
        assert!(!analyzer.is_reverted());
        assert!(!analyzer.has_active());

        storage.set_atom_state("a", AtomState::Reverted).await.unwrap();
        assert!(Analyzer::new(&compilation, &storage).is_reverted());

        storage.set_atom_state("b", AtomState::Running).await.unwrap();
        let analyzer = Analyzer::new(&compilation, &storage);
        assert!(analyzer.has_active());
        assert!(!analyzer.is_reverted());
    }
}
