//! Tests for the autoloader service.

#[cfg(test)]
mod tests {
    use crate::autoloader::{builtin_handles, resolver_for, Autoloader};
    use crate::bootstrap::{BootstrapError, BootstrapState};
    use crate::config::AutoLoaderOptions;
    use crate::document::Document;
    use crate::engine::{derive_options, MarkmapOptions};
    use crate::injector::AssetError;
    use crate::provider::DEFAULT_PROVIDER;
    use crate::render::RenderError;
    use crate::test_support::{test_resolver, InstantProbe, RecordingInjector};
    use std::sync::Arc;

    fn autoloader(
        options: AutoLoaderOptions,
        document: Arc<Document>,
        injector: Arc<RecordingInjector>,
    ) -> Arc<Autoloader> {
        let resolver = Arc::new(test_resolver());
        let handles = builtin_handles(&resolver);
        Autoloader::new(options, document, resolver, injector, handles)
    }

    fn page(blocks: &[&str]) -> String {
        let body: String = blocks
            .iter()
            .map(|b| format!("<div class=\"markmap\">{}</div>", b))
            .collect();
        format!("<html><head></head><body>{}</body></html>", body)
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_explicit_render() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&["# A"]));
        let options = AutoLoaderOptions::from_json(r#"{ "manual": true }"#).unwrap();
        let loader = autoloader(options, Arc::clone(&document), injector.clone());

        assert!(loader.auto_start().is_none());
        tokio::task::yield_now().await;
        assert_eq!(loader.state(), BootstrapState::NotStarted);
        assert_eq!(injector.js_calls(), 0);
        assert!(!document.to_html().contains("<svg"));

        let units = loader.render_all().await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(loader.state(), BootstrapState::Ready);
        assert!(document.to_html().contains("<svg"));
    }

    #[tokio::test]
    async fn test_auto_start_waits_for_page_load() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::loading(page(&["# A", "# B"]));
        let loader = autoloader(AutoLoaderOptions::default(), Arc::clone(&document), injector.clone());

        let handle = loader.auto_start().unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.state(), BootstrapState::NotStarted);
        assert_eq!(injector.js_calls(), 0);

        document.mark_loaded();
        let units = handle.await.unwrap().unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.render_count() == 1));
    }

    #[tokio::test]
    async fn test_front_matter_options_override_defaults() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&[
            "# Plain\n- a",
            "---\nmarkmap:\n  maxWidth: 300\n---\n# Narrow\n- b",
        ]));
        let loader = autoloader(AutoLoaderOptions::default(), document, injector);

        let units = loader.render_all().await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].options(), Some(derive_options(None)));

        let narrow = units[1].options().unwrap();
        assert_eq!(narrow.max_width, 300);
        assert_eq!(
            MarkmapOptions {
                max_width: 0,
                ..narrow
            },
            MarkmapOptions::default()
        );
    }

    #[tokio::test]
    async fn test_shared_feature_assets_requested_once() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&["# Math\n- $x^2$", "# More math\n- $y^2$"]));
        let loader = autoloader(AutoLoaderOptions::default(), document, injector.clone());

        let units = loader.render_all().await.unwrap();
        assert_eq!(units.len(), 2);
        assert!(loader.features().is_enabled("katex"));

        let requested = injector.requested();
        let count = |needle: &str| requested.iter().filter(|u| u.contains(needle)).count();
        assert_eq!(count("katex.min.css"), 1);
        assert_eq!(count("katex.min.js"), 1);
        assert_eq!(count("webfontloader"), 1);
    }

    #[tokio::test]
    async fn test_render_all_under_is_scoped() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(
            "<html><body>\
             <section id=\"scope\"><div class=\"markmap\"># Inside</div></section>\
             <div class=\"markmap\"># Outside</div>\
             </body></html>",
        );
        let loader = autoloader(AutoLoaderOptions::default(), Arc::clone(&document), injector);

        let section = document.get_element_by_id("scope").unwrap();
        let units = loader.render_all_under(&section).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].content(), "# Inside");
        assert!(document.to_html().contains("># Outside</div>"));
    }

    #[tokio::test]
    async fn test_block_content_is_dedented() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&["\n      # Title\n        - child\n      - sibling\n    "]));
        let loader = autoloader(AutoLoaderOptions::default(), document, injector);

        let units = loader.render_all().await.unwrap();
        assert_eq!(units[0].content(), "# Title\n  - child\n- sibling");
    }

    #[tokio::test]
    async fn test_retransform_rerenders_until_unsubscribed() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&["# A\n- b"]));
        let loader = autoloader(AutoLoaderOptions::default(), document, injector);

        let mut units = loader.render_all().await.unwrap();
        let unit = units.remove(0);
        assert_eq!(unit.render_count(), 1);

        let transformer = Arc::clone(unit.transformer());
        transformer.hooks().retransform.call();
        unit.wait_for_renders(2).await;
        assert_eq!(unit.render_count(), 2);

        unit.unsubscribe();
        for _ in 0..10 {
            if transformer.hooks().retransform.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transformer.hooks().retransform.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_block_does_not_affect_others() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&[
            "---\nmarkmap: [unclosed\n---\n# Broken",
            "# Fine\n- leaf",
        ]));
        let loader = autoloader(AutoLoaderOptions::default(), Arc::clone(&document), injector);

        let units = loader.render_all().await.unwrap();
        assert_eq!(units.len(), 2);
        assert!(matches!(units[0].last_error(), Some(RenderError::Transform(_))));
        assert_eq!(units[0].render_count(), 0);
        assert!(units[1].last_error().is_none());
        assert_eq!(units[1].render_count(), 1);
        assert!(document.to_html().contains(">leaf</text>"));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_renders_nothing() {
        let injector = Arc::new(RecordingInjector::failing_on("https://cdn.test/npm/pkgA@1.0/x.js"));
        let document = Document::parse(page(&["# A"]));
        let options = AutoLoaderOptions::from_json(r#"{ "baseJs": ["pkgA@1.0/x.js"] }"#).unwrap();
        let loader = autoloader(options, Arc::clone(&document), injector);

        let err = loader.render_all().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Assets(AssetError::Status { .. })));
        assert_eq!(loader.state(), BootstrapState::Failed);
        assert!(!document.to_html().contains("<svg"));

        // Later scans fail the same way without retrying.
        assert_eq!(loader.render_all().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_failed_feature_assets_do_not_block_rendering() {
        let injector = Arc::new(RecordingInjector::failing_on(
            "https://cdn.test/npm/katex@0.16.18/dist/katex.min.css",
        ));
        let document = Document::parse(page(&["# Math\n- $x$"]));
        let loader = autoloader(AutoLoaderOptions::default(), Arc::clone(&document), injector.clone());

        let mut units = loader.render_all().await.unwrap();
        let unit = units.remove(0);
        assert_eq!(unit.render_count(), 1);
        assert!(unit.last_error().is_none());
        assert!(loader.features().is_enabled("katex"));
        assert!(document.to_html().contains("<svg"));

        // The feature stays claimed, so a retransform does not ask for it again.
        let katex_requests = |injector: &RecordingInjector| {
            injector.requested().iter().filter(|u| u.contains("katex")).count()
        };
        let requested = katex_requests(&injector);
        let css_calls = injector.css_calls();
        unit.transformer().hooks().retransform.call();
        unit.wait_for_renders(2).await;
        assert_eq!(unit.render_count(), 2);
        assert_eq!(katex_requests(&injector), requested);
        assert_eq!(injector.css_calls(), css_calls);
    }

    #[tokio::test]
    async fn test_toolbar_is_attached_when_enabled() {
        let injector = Arc::new(RecordingInjector::default());
        let document = Document::parse(page(&["# A"]));
        let options = AutoLoaderOptions::from_json(r#"{ "toolbar": true }"#).unwrap();
        let loader = autoloader(options, Arc::clone(&document), injector);

        let units = loader.render_all().await.unwrap();
        let block = units[0].element().inner_html();
        assert!(block.contains("position:absolute;right:20px;bottom:20px"));
        // The diagram is drawn before the toolbar.
        let svg = block.find("<svg").unwrap();
        let toolbar = block.find("class=\"mm-toolbar\"").unwrap();
        assert!(svg < toolbar);
        assert!(document.to_html().contains("class=\"mm-toolbar\""));
    }

    #[tokio::test]
    async fn test_resolver_for_configured_providers() {
        let options = AutoLoaderOptions::from_json(
            r#"{ "providers": [
                { "name": "broken", "template": "not a url/{path}" },
                { "name": "local", "template": "http://localhost:8080/npm/{path}" }
            ] }"#,
        )
        .unwrap();
        let resolver = resolver_for(&options, Arc::new(InstantProbe));
        assert_eq!(resolver.find_fastest_provider().await, "local");
        assert_eq!(
            resolver.get_full_url("d3@7").unwrap(),
            "http://localhost:8080/npm/d3@7"
        );
    }

    #[tokio::test]
    async fn test_resolver_for_defaults() {
        let resolver = resolver_for(&AutoLoaderOptions::default(), Arc::new(InstantProbe));
        let chosen = resolver.find_fastest_provider().await.to_string();
        assert!(chosen == DEFAULT_PROVIDER || chosen == "unpkg");
    }
}
