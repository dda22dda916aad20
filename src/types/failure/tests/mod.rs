#[cfg(test)]
mod tests {
    use super::super::*;
    use std::any::Any;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_failure_captures_source_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let failure = Failure::from_error(&err);

        assert_eq!(failure.exception_str(), "outer failed");
        assert_eq!(failure.causes().len(), 1);
        assert_eq!(failure.causes()[0].exception_str(), "disk gone");
        assert!(failure.traceback().unwrap().contains("disk gone"));
    }

    #[test]
    fn test_failure_from_flow_error_keeps_kind() {
        let err = FlowError::NoCapableWorker {
            task: "hi".into(),
            version: "1.0".into(),
        };
        let failure = Failure::from_error(&err);
        assert_eq!(failure.check(&["NoCapableWorker"]), Some("NoCapableWorker"));
        assert_eq!(failure.check(&["Error"]), Some("Error"));
        assert_eq!(failure.check(&["LostWorker"]), None);
    }

    #[test]
    fn test_failure_survives_json() {
        let failure = Failure::new("ValueError", "bad input").with_traceback("line 1");
        let text = serde_json::to_string(&failure).unwrap();
        let back: Failure = serde_json::from_str(&text).unwrap();
        assert_eq!(back, failure);
        assert!(back.matches(&failure));
    }

    #[test]
    fn test_failure_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        let failure = Failure::from_panic(payload);
        assert_eq!(failure.to_string(), "Panic: kaboom");
    }

    #[test]
    fn test_wrapped_failure_check() {
        let wrapped = WrappedFailure::new(vec![
            Failure::new("ValueError", "a"),
            Failure::new("RequestTimeout", "b"),
        ]);
        assert_eq!(wrapped.len(), 2);
        assert_eq!(
            wrapped.check(&["RequestTimeout"]).map(|f| f.exception_str()),
            Some("b")
        );
        assert!(wrapped.to_string().starts_with("WrappedFailure: ["));
    }
}
