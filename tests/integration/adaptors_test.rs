//! Built-in adaptors run through a full lifecycle in the sandbox.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use campaign_adaptors::{builtin_catalog, google_analytics};
    use campaign_core::config::AppConfig;
    use campaign_core::VendorCall;
    use campaign_tags::{Environment, InitOutcome, LifecycleState, RegistryGuard, SandboxEnvironment};
    use serde_json::{json, Map, Value};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_every_builtin_renders_with_settings() {
        let catalog = builtin_catalog().unwrap();
        let settings = object(json!({
            "siteId": "s1",
            "apiKey": "k1",
            "containerId": "GTM-1",
            "trackingId": "UA-1"
        }));
        for name in catalog.names() {
            let env = Arc::new(SandboxEnvironment::new());
            let integration = catalog
                .instantiate(&name, &settings, env.clone(), &AppConfig::default())
                .unwrap();
            assert_eq!(integration.initialize(), InitOutcome::Loading, "{name}");

            let injected = env.injected();
            assert_eq!(injected.len(), 1, "{name}");
            let url = injected[0].url().unwrap().unwrap();
            assert_eq!(url.scheme(), "https", "{name}");
        }
    }

    #[test]
    fn test_google_analytics_universal_flow() {
        let catalog = builtin_catalog().unwrap();
        let env = Arc::new(SandboxEnvironment::new());
        env.strict_invoke(true);
        env.defines_on_load("google-analytics.com", "gaplugins", json!({}));
        let integration = catalog
            .instantiate(
                google_analytics::NAME,
                &object(json!({"trackingId": "UA-27033709-12", "anonymizeIp": true})),
                env.clone(),
                &AppConfig::default(),
            )
            .unwrap();

        integration.initialize();
        assert_eq!(env.global("GoogleAnalyticsObject"), Some(json!("ga")));
        assert_eq!(env.global("ga").unwrap()["q"], json!([]));
        assert!(!integration.loaded());

        integration.track("Viewed Pricing", object(json!({"revenue": 9.99})));
        let setup: Vec<VendorCall> = env.invocations();
        assert_eq!(setup.len(), 4);
        assert_eq!(setup[2].args[0], "create");
        assert_eq!(setup[3].args, vec![json!("set"), json!("anonymizeIp"), json!(true)]);

        env.fire_load("analytics.js");
        assert_eq!(integration.state(), LifecycleState::Ready);
        assert!(integration.loaded());
        let sent = env.invocations();
        assert_eq!(sent.len(), 5);
        assert_eq!(
            sent[4].args,
            vec![
                json!("send"),
                json!("event"),
                json!({"eventCategory": "All", "eventAction": "Viewed Pricing", "eventValue": 10})
            ]
        );
    }

    #[test]
    fn test_google_analytics_classic_selects_ga_js() {
        let catalog = builtin_catalog().unwrap();
        let env = Arc::new(SandboxEnvironment::new());
        env.strict_invoke(true);
        env.defines_on_load("ga.js", "_gat", json!({}));
        let integration = catalog
            .instantiate(
                google_analytics::NAME,
                &object(json!({"classic": true, "trackingId": "UA-27033709-5"})),
                env.clone(),
                &AppConfig::default(),
            )
            .unwrap();
        integration.initialize();

        assert_eq!(
            env.injected()[0].src(),
            Some("//www.google-analytics.com/ga.js")
        );
        assert_eq!(env.global("_gaq"), Some(json!([])));
        assert!(env.invocations()[1..].iter().all(|c| c.target == "_gaq.push"));

        assert!(!integration.loaded());
        env.fire_load("ga.js");
        assert!(integration.loaded());
    }

    #[test]
    fn test_google_analytics_skips_load_when_library_present() {
        let catalog = builtin_catalog().unwrap();
        let env = Arc::new(SandboxEnvironment::new());
        env.set_global("ga", json!({"loaded": true}));
        env.set_global("gaplugins", json!({}));
        let integration = catalog
            .instantiate(
                google_analytics::NAME,
                &object(json!({"trackingId": "UA-27033709-12"})),
                env.clone(),
                &AppConfig::default(),
            )
            .unwrap();

        assert_eq!(integration.initialize(), InitOutcome::AlreadyPresent);
        assert!(env.injected().is_empty());
        assert_eq!(env.global("ga"), Some(json!({"loaded": true})));
        assert!(integration.loaded());
    }

    #[test]
    fn test_snapshot_restores_preexisting_globals() {
        let catalog = builtin_catalog().unwrap();
        let env = Arc::new(SandboxEnvironment::new());
        let entry = catalog.get("SnapEngage").unwrap();
        let guard = RegistryGuard::new(env.clone());
        let snapshot = guard.capture(&entry.descriptor);

        let integration = catalog
            .instantiate("SnapEngage", &Map::new(), env.clone(), &AppConfig::default())
            .unwrap();
        env.defines_on_load("snapengage.com", "SnapABug", json!({"loaded": true}));
        integration.initialize();
        env.fire_load("snapengage.com");
        assert!(guard.is_present(&entry.descriptor));

        guard.restore(&snapshot);
        assert!(!guard.is_present(&entry.descriptor));
    }
}
