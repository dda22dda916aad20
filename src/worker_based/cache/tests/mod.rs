#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::atom::Version;

    fn key(name: &str) -> TaskKey {
        TaskKey::new(name, Version::default())
    }

    #[test]
    fn test_topics_for_matches_name_and_version() {
        let cache = WorkersCache::new(Duration::from_secs(60));
        cache.update("w2", vec![key("hi"), key("bye")]);
        cache.update("w1", vec![key("hi")]);

        assert_eq!(cache.topics_for(&key("hi")), vec!["w1", "w2"]);
        assert_eq!(cache.topics_for(&key("bye")), vec!["w2"]);
        assert!(cache
            .topics_for(&TaskKey::new("hi", Version::new(2, 0)))
            .is_empty());
    }

    #[test]
    fn test_update_replaces_advertisement() {
        let cache = WorkersCache::new(Duration::from_secs(60));
        cache.update("w1", vec![key("hi")]);
        cache.update("w1", vec![key("bye")]);

        assert!(cache.topics_for(&key("hi")).is_empty());
        assert_eq!(cache.topics_for(&key("bye")), vec!["w1"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_workers_are_ignored_and_pruned() {
        let cache = WorkersCache::new(Duration::from_millis(20));
        cache.update("w1", vec![key("hi")]);
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.topics_for(&key("hi")).is_empty());
        assert_eq!(cache.prune(), vec!["w1".to_string()]);
        assert!(cache.is_empty());
        assert!(!cache.contains("w1"));
    }
}
