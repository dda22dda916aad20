#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::atom::{TaskKey, Version};
    use crate::task::{BoxError, Task};
    use crate::worker_based::protocol::RemoteOutcome;
    use crate::worker_based::proxy::InMemoryTransport;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        async fn execute(&self, args: &Arguments, _progress: &Progress) -> std::result::Result<Value, BoxError> {
            Ok(Value::Object(args.clone()))
        }
    }

    fn fast_options() -> WorkerExecutorOptions {
        WorkerExecutorOptions::default()
            .with_ack_timeout(Duration::from_millis(150))
            .with_execution_timeout(Duration::from_millis(150))
            .with_wait_period(Duration::from_millis(10))
    }

    async fn advertise(transport: &InMemoryTransport, topic: &str, task: &str) {
        let envelope = Envelope::capabilities(&Capabilities {
            topic: topic.to_string(),
            tasks: vec![TaskKey::new(task, Version::default())],
        })
        .unwrap();
        transport
            .publish("atomflow", CAPABILITIES_TOPIC, envelope.encode().unwrap())
            .await
            .unwrap();
    }

    async fn wait_capable(executor: &WorkerTaskExecutor, atom: &Atom) {
        for _ in 0..100 {
            if !executor.capable_topics(atom).is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no worker became capable of '{}'", atom.name());
    }

    async fn respond(transport: &InMemoryTransport, reply_to: &str, id: Uuid, response: Response) {
        let envelope = Envelope::response(id, &response).unwrap();
        transport
            .publish("atomflow", reply_to, envelope.encode().unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_options_from_json() {
        let options: WorkerExecutorOptions = serde_json::from_value(json!({
            "exchange": "jobs",
            "topics": ["w1", "w2"],
            "ack_timeout": 250
        }))
        .unwrap();

        assert_eq!(options.exchange, "jobs");
        assert_eq!(options.topics, vec!["w1", "w2"]);
        assert_eq!(options.ack_timeout, Duration::from_millis(250));
        assert_eq!(options.max_dispatch_attempts, 2);
    }

    #[test]
    fn test_reply_topic_is_generated() {
        let executor = WorkerTaskExecutor::new(Arc::new(InMemoryTransport::new()), fast_options());
        assert!(executor.topic().starts_with("executor-"));

        let named = WorkerTaskExecutor::new(
            Arc::new(InMemoryTransport::new()),
            fast_options().with_topic("engine-1"),
        );
        assert_eq!(named.topic(), "engine-1");
    }

    #[tokio::test]
    async fn test_no_capable_worker_fails_immediately() {
        let executor = WorkerTaskExecutor::new(Arc::new(InMemoryTransport::new()), fast_options());
        let atom = Atom::task("echo", Echo);

        let completion = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("echo"))
            .await
            .await;

        let failure = completion.outcome.unwrap_err();
        assert_eq!(failure.check(&["NoCapableWorker"]), Some("NoCapableWorker"));
        assert_eq!(executor.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_result_is_matched_by_correlation_id() {
        let transport = InMemoryTransport::new();
        let executor = WorkerTaskExecutor::new(Arc::new(transport.clone()), fast_options());
        executor.start().await.unwrap();
        let mut inbox = transport.subscribe("atomflow", "w1").await.unwrap();
        advertise(&transport, "w1", "echo").await;

        let atom = Atom::task("echo", Echo);
        wait_capable(&executor, &atom).await;
        let mut args = Arguments::new();
        args.insert("x".to_string(), json!(1));
        let future = executor
            .execute_task(&atom, args.clone(), Progress::detached("echo"))
            .await;

        let envelope = Envelope::decode(&inbox.recv().await.unwrap()).unwrap();
        assert_eq!(envelope.kind, MessageKind::Request);
        let request: Request = envelope.parse_body().unwrap();
        assert_eq!(request.atom_name, "echo");
        assert_eq!(request.action, Action::Execute);
        assert_eq!(request.arguments, args);
        let reply_to = envelope.reply_to.clone().unwrap();
        assert_eq!(reply_to, executor.topic());

        // A reply nobody is waiting for is discarded.
        respond(
            &transport,
            &reply_to,
            Uuid::new_v4(),
            Response::Result(RemoteOutcome::Success(json!("stray"))),
        )
        .await;
        respond(&transport, &reply_to, envelope.correlation_id, Response::Ack).await;
        respond(
            &transport,
            &reply_to,
            envelope.correlation_id,
            Response::Result(RemoteOutcome::Success(json!(42))),
        )
        .await;

        let completion = future.await;
        assert_eq!(completion.atom, "echo");
        assert_eq!(completion.outcome, Ok(json!(42)));
        assert_eq!(executor.pending_requests(), 0);
        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unacknowledged_request_times_out() {
        let transport = InMemoryTransport::new();
        let executor = WorkerTaskExecutor::new(Arc::new(transport.clone()), fast_options());
        executor.start().await.unwrap();
        let _inbox = transport.subscribe("atomflow", "w1").await.unwrap();
        advertise(&transport, "w1", "echo").await;

        let atom = Atom::task("echo", Echo);
        wait_capable(&executor, &atom).await;
        let completion = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("echo"))
            .await
            .await;

        let failure = completion.outcome.unwrap_err();
        assert_eq!(failure.check(&["RequestTimeout"]), Some("RequestTimeout"));
        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_worker_after_ack_is_lost() {
        let transport = InMemoryTransport::new();
        let executor = WorkerTaskExecutor::new(Arc::new(transport.clone()), fast_options());
        executor.start().await.unwrap();
        let mut inbox = transport.subscribe("atomflow", "w1").await.unwrap();
        advertise(&transport, "w1", "echo").await;

        let atom = Atom::task("echo", Echo);
        wait_capable(&executor, &atom).await;
        let future = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("echo"))
            .await;
        let envelope = Envelope::decode(&inbox.recv().await.unwrap()).unwrap();
        respond(&transport, executor.topic(), envelope.correlation_id, Response::Ack).await;

        let failure = future.await.outcome.unwrap_err();
        assert_eq!(failure.check(&["LostWorker"]), Some("LostWorker"));
        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_requests() {
        let transport = InMemoryTransport::new();
        let options = fast_options().with_ack_timeout(Duration::from_secs(30));
        let executor = WorkerTaskExecutor::new(Arc::new(transport.clone()), options);
        executor.start().await.unwrap();
        let _inbox = transport.subscribe("atomflow", "w1").await.unwrap();
        advertise(&transport, "w1", "echo").await;

        let atom = Atom::task("echo", Echo);
        wait_capable(&executor, &atom).await;
        let future = executor
            .execute_task(&atom, Arguments::new(), Progress::detached("echo"))
            .await;
        assert_eq!(executor.pending_requests(), 1);

        executor.stop().await.unwrap();
        let failure = future.await.outcome.unwrap_err();
        assert_eq!(failure.check(&["Cancelled"]), Some("Cancelled"));
    }

    #[tokio::test]
    async fn test_stop_before_start_does_not_block_the_next_start() {
        let transport = InMemoryTransport::new();
        let executor = WorkerTaskExecutor::new(Arc::new(transport.clone()), fast_options());
        executor.stop().await.unwrap();

        let started = tokio::time::timeout(Duration::from_secs(1), executor.start()).await;
        assert!(matches!(started, Ok(Ok(()))));
        executor.stop().await.unwrap();
    }
}
