//! Exercises [`r2e_test::TestHub`] the way a downstream crate would: as an
//! external dependency, with no access to `Hub`'s private fields.

use r2e_test::TestHub;

#[tokio::test]
async fn ingest_and_drain_reports_the_new_topic_as_active() {
    let test_hub = TestHub::new();
    test_hub.start().await;

    test_hub
        .ingest_and_drain("mqtt-1", "mqtt", "line1", br#"{"temperature": 21.5}"#)
        .await
        .unwrap();

    let status = test_hub.hub.system_status();
    assert_eq!(status.total_topics, 1);
    assert_eq!(status.topics_per_source_type.get("mqtt"), Some(&1));

    let topics = test_hub.hub.search_topics("line1/#");
    assert_eq!(topics.len(), 1);

    test_hub.stop().await;
}

#[tokio::test]
async fn with_hierarchy_rejects_a_topic_outside_the_configured_levels() {
    use r2e_core::hierarchy::{HierarchyConfiguration, HierarchyNode};
    use r2e_core::HierarchyRegistry;
    use r2e_test::TestHub;

    let registry = HierarchyRegistry::new();
    registry
        .register(
            HierarchyConfiguration::new(
                "single-level",
                "single",
                vec![HierarchyNode {
                    id: "enterprise".into(),
                    name: "Enterprise".into(),
                    order: 0,
                    required: true,
                    parent_id: None,
                    allowed_child_ids: vec![],
                    allow_topics: true,
                    description: None,
                }],
                true,
            )
            .unwrap(),
        );
    let test_hub = TestHub::with_hierarchy(Default::default(), registry);
    test_hub.start().await;

    test_hub
        .ingest_and_drain("mqtt-1", "mqtt", "line1", br#"{"tagA": 1}"#)
        .await
        .unwrap();

    // No matching namespace for the topic yet, so it lands in the
    // unverified pool rather than being silently dropped.
    assert_eq!(test_hub.hub.unverified_topics().len(), 1);

    test_hub.stop().await;
}
