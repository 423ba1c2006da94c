//! End-to-end lifecycle scenarios: built-in adaptors driven through the
//! analytics hub against the sandbox environment.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use campaign_adaptors::builtin_catalog;
    use campaign_core::config::{AppConfig, LoaderConfig};
    use campaign_core::event_bus::{capture_sink, LifecycleEventKind};
    use campaign_tags::{Analytics, Environment, LifecycleState, ResetGlobals, SandboxEnvironment};
    use serde_json::{json, Map, Value};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn settings() -> Map<String, Value> {
        object(json!({
            "Perfect Audience": {"siteId": "4ff6ade4361ed500020000a5"},
            "Google Analytics": {"trackingId": "UA-27033709-12"},
            "SnapEngage": {"apiKey": "782b737e-487f-4117-8a2b-2beb32b600e5"}
        }))
    }

    fn hub(env: &Arc<SandboxEnvironment>, config: AppConfig) -> Analytics {
        Analytics::new(Arc::new(builtin_catalog().unwrap()), env.clone(), config)
    }

    #[test]
    fn test_signed_up_is_delivered_after_ready() {
        let env = Arc::new(SandboxEnvironment::new());
        env.defines_on_load("perfectaudience.com", "_pa", json!({}));
        let sink = capture_sink();
        let analytics = hub(&env, AppConfig::default()).with_event_sink(sink.clone());

        analytics.initialize_with(&settings()).unwrap();
        analytics.track("Signed Up", object(json!({"plan": "pro"})));
        assert!(env.invocations_of("_pa.track").is_empty());

        env.fire_load("perfectaudience.com");

        let pa = analytics.get("Perfect Audience").unwrap();
        assert_eq!(pa.state(), LifecycleState::Ready);
        assert_eq!(
            env.invocations_of("_pa.track")[0].args,
            vec![json!("Signed Up"), json!({"plan": "pro"})]
        );
        let pa_events: Vec<LifecycleEventKind> = sink
            .events()
            .into_iter()
            .filter(|e| e.integration == "Perfect Audience")
            .map(|e| e.kind)
            .collect();
        assert_eq!(pa_events, vec![LifecycleEventKind::Load, LifecycleEventKind::Ready]);

        // Other vendors are still waiting and have sent nothing but setup.
        let ga = analytics.get("Google Analytics").unwrap();
        assert_eq!(ga.state(), LifecycleState::Loading);
        assert_eq!(ga.queued(), 1);
    }

    #[test]
    fn test_one_failure_does_not_block_ready() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = hub(&env, AppConfig::default());
        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        analytics.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        analytics.initialize_with(&settings()).unwrap();
        analytics.identify(None, object(json!({"email": "name@example.com"})));
        env.fire_error("google-analytics.com", "blocked by client");
        env.fire_load("perfectaudience.com");
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        env.fire_load("snapengage.com");

        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(
            analytics.get("Google Analytics").unwrap().state(),
            LifecycleState::Failed
        );
        assert_eq!(env.invocations_of("SnapABug.setUserEmail").len(), 1);
    }

    #[test]
    fn test_timeout_fails_once_without_dispatch() {
        let env = Arc::new(SandboxEnvironment::new());
        let config = AppConfig {
            loader: LoaderConfig {
                script_timeout_ms: Some(5_000),
                ..LoaderConfig::default()
            },
            ..AppConfig::default()
        };
        let sink = capture_sink();
        let analytics = hub(&env, config).with_event_sink(sink.clone());
        analytics
            .initialize_with(&object(json!({"SnapEngage": {"apiKey": "k"}})))
            .unwrap();
        analytics.identify(None, object(json!({"email": "late@example.com"})));

        env.advance(Duration::from_secs(5));
        env.fire_load("snapengage.com");
        env.advance(Duration::from_secs(60));

        let snapengage = analytics.get("SnapEngage").unwrap();
        assert_eq!(snapengage.state(), LifecycleState::Failed);
        assert_eq!(sink.count_kind(LifecycleEventKind::Error), 1);
        assert_eq!(sink.count_kind(LifecycleEventKind::Ready), 0);
        assert!(env.invocations().is_empty());
        assert!(analytics.is_ready());
    }

    #[test]
    fn test_initialize_twice_injects_once() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = hub(&env, AppConfig::default());
        analytics.initialize_with(&settings()).unwrap();
        analytics.initialize();

        assert_eq!(env.injected().len(), 3);
        for integration in analytics.integrations() {
            assert_eq!(integration.load_count(), 1, "{}", integration.name());
        }
    }

    #[test]
    fn test_reset_wipes_globals_between_runs() {
        let env = Arc::new(SandboxEnvironment::new());
        env.defines_on_load("perfectaudience.com", "_pa", json!({"track": "function"}));
        let analytics = hub(&env, AppConfig::default());
        analytics
            .initialize_with(&object(json!({"Perfect Audience": {"siteId": "abc"}})))
            .unwrap();
        env.fire_load("perfectaudience.com");
        let pa = analytics.get("Perfect Audience").unwrap();
        assert!(pa.loaded());

        analytics.reset(ResetGlobals::Wipe);
        assert_eq!(env.global("_pa"), None);
        assert!(!pa.loaded());
        assert_eq!(pa.state(), LifecycleState::Idle);
    }
}
