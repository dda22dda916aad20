#[cfg(test)]
mod tests {
    use super::super::*;
    use uuid::Uuid;

    #[derive(Default)]
    struct Collector {
        received: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl MessageHandler for Collector {
        async fn on_message(&self, envelope: Envelope) {
            self.received.lock().push(envelope.correlation_id);
        }
    }

    const TICK: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_stop_before_start_is_not_lost() {
        let proxy = Proxy::new("ex", "early", Arc::new(InMemoryTransport::new()));
        let handler = Collector::default();

        proxy.stop();
        let run = tokio::time::timeout(Duration::from_secs(1), proxy.start(&handler, TICK)).await;
        assert!(matches!(run, Ok(Ok(()))));
        assert!(!proxy.is_running());
    }

    #[tokio::test]
    async fn test_proxy_restarts_after_stop() {
        let transport = Arc::new(InMemoryTransport::new());
        let proxy = Arc::new(Proxy::new("ex", "again", transport.clone()));
        let handler = Arc::new(Collector::default());

        for _ in 0..2 {
            let consumer = {
                let proxy = proxy.clone();
                let handler = handler.clone();
                tokio::spawn(async move { proxy.start(handler.as_ref(), TICK).await })
            };
            proxy.wait().await;
            assert!(proxy.is_running());
            proxy.publish(&Envelope::discover("reply"), "again").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            proxy.stop();
            consumer.await.unwrap().unwrap();
            assert!(!proxy.is_running());
        }
        assert_eq!(handler.received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let transport = Arc::new(InMemoryTransport::new());
        let proxy = Arc::new(Proxy::new("ex", "inbox", transport.clone()));
        let handler = Arc::new(Collector::default());
        let consumer = {
            let proxy = proxy.clone();
            let handler = handler.clone();
            tokio::spawn(async move { proxy.start(handler.as_ref(), TICK).await })
        };
        proxy.wait().await;

        transport.publish("ex", "inbox", b"not json".to_vec()).await.unwrap();
        let valid = Envelope::discover("reply");
        transport
            .publish("ex", "inbox", valid.encode().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        proxy.stop();
        consumer.await.unwrap().unwrap();

        assert_eq!(*handler.received.lock(), vec![valid.correlation_id]);
    }
}
