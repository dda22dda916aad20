#[cfg(test)]
mod tests {
    use crate::task::example_task::{ByeTask, HiTask};
    use crate::task::{
        AlwaysRevert, AlwaysRevertAll, Arguments, Decision, Progress, Retry, RetryHistory,
        RetryPolicy, Task,
    };
    use crate::types::Failure;
    use std::time::Duration;
    use tokio::sync::mpsc;

    // Test RetryPolicy
    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.retry_delay.as_secs(), 0);
        assert_eq!(policy.exhausted, Decision::Revert);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::default()
            .with_max_retries(3)
            .with_retry_delay(Duration::from_secs(2))
            .on_exhausted(Decision::RevertAll);

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay.as_secs(), 2);
        assert_eq!(policy.exhausted, Decision::RevertAll);
    }

    #[test]
    fn test_retry_policy_decisions_follow_history() {
        let policy = RetryPolicy::new(2, Duration::from_millis(0));
        let mut history = RetryHistory::new();

        history.record_result(1.into());
        history.record_failure("a", Failure::new("ValueError", "boom"));
        assert_eq!(policy.on_failure(&history), Decision::Retry);

        history.record_result(2.into());
        history.record_failure("a", Failure::new("ValueError", "boom"));
        assert_eq!(policy.on_failure(&history), Decision::Retry);

        history.record_result(3.into());
        history.record_failure("a", Failure::new("ValueError", "boom"));
        assert_eq!(policy.on_failure(&history), Decision::Revert);
        assert_eq!(history.last_failures().count(), 1);
    }

    #[test]
    fn test_fixed_decisions() {
        let history = RetryHistory::new();
        assert_eq!(AlwaysRevert.on_failure(&history), Decision::Revert);
        assert_eq!(AlwaysRevertAll.on_failure(&history), Decision::RevertAll);
        assert_eq!(Decision::RevertAll.to_string(), "REVERT_ALL");
    }

    #[tokio::test]
    async fn test_retry_execute_counts_attempts() {
        let policy = RetryPolicy::default();
        let mut history = RetryHistory::new();
        let first = policy.execute(&history).await.unwrap();
        history.record_result(first.clone());
        let second = policy.execute(&history).await.unwrap();
        assert_eq!(first, serde_json::json!(1));
        assert_eq!(second, serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_task_execution_success() {
        let task = ByeTask { blowup: false };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress = Progress::new("bye", tx);
        let result = task.execute(&Arguments::new(), &progress).await;
        assert!(result.is_ok());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.atom, "bye");
        assert_eq!(event.progress, 1.0);
    }

    #[tokio::test]
    async fn test_task_execution_failure() {
        let task = ByeTask { blowup: true };
        let result = task
            .execute(&Arguments::new(), &Progress::detached("bye"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_revert_is_noop() {
        let outcome = Ok(serde_json::Value::Null);
        let result = HiTask
            .revert(&Arguments::new(), &outcome, &Progress::detached("hi"))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_progress_is_clamped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress = Progress::new("a", tx);
        progress.update(3.5, None);
        progress.update(-1.0, None);
        assert_eq!(rx.try_recv().unwrap().progress, 1.0);
        assert_eq!(rx.try_recv().unwrap().progress, 0.0);
    }
}
