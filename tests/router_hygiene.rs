//! Cross-cutting router properties: connection hygiene, disallowed
//! commands, registry metadata, and metrics.

use docgrid::{doc, CommandHandler, KeyPattern, LockType, Namespace};

mod support;

use support::{build_router, shard, MockCatalog, MockChunkManager, MockConnector, MockDbConfig};

#[tokio::test]
async fn connections_are_released_on_every_path() {
    let s1 = shard("s1");
    let s2 = shard("s2");
    let ns = Namespace::new("app", "users");
    let catalog = MockCatalog::new();
    let conf = MockDbConfig::sharding("app", &s1, [s1.clone(), s2.clone()]);
    conf.shard_collection(
        &ns,
        MockChunkManager::new(KeyPattern::single("user_id"), [s1, s2]),
    );
    catalog.add(conf);

    let connector = MockConnector::new();
    connector.set_default_reply("s1", doc! { "n" => 1, "ok" => 1.0 });
    // s2 always fails hard
    connector.set_default_reply("s2", doc! { "errmsg" => "disk on fire", "ok" => 0.0 });

    let router = build_router(catalog, connector.clone());

    let commands = [
        doc! { "count" => "users" },
        doc! { "distinct" => "users", "key" => "age" },
        doc! { "validate" => "users" },
        doc! { "geoNear" => "users", "near" => 0 },
    ];
    for cmd in &commands {
        let _ = router.run_command("app", cmd).await;
        assert_eq!(
            connector.live_connections(),
            0,
            "leaked connection after {:?}",
            cmd.first().unwrap().0
        );
    }
    assert!(connector.total_connects() > 0);
}

#[tokio::test]
async fn transport_failure_releases_and_reports() {
    let s1 = shard("s1");
    let catalog = MockCatalog::new();
    catalog.add(MockDbConfig::unsharded("app", &s1));

    let connector = MockConnector::new();
    connector.fail_connect("s1");

    let router = build_router(catalog, connector.clone());
    let reply = router.run_command("app", &doc! { "count" => "users" }).await;

    assert_eq!(reply.get_f64("ok"), 0.0);
    assert!(reply.get_str("errmsg").unwrap().contains("s1"));
    assert_eq!(connector.live_connections(), 0);
}

#[tokio::test]
async fn apply_ops_is_always_rejected() {
    let router = build_router(MockCatalog::new(), MockConnector::new());
    let reply = router
        .run_command("app", &doc! { "applyOps" => "users" })
        .await;

    assert_eq!(reply.get_f64("ok"), 0.0);
    assert_eq!(
        reply.get_str("errmsg"),
        Some("applyOps not allowed through mongos")
    );
}

#[tokio::test]
async fn sharded_only_restrictions_reject_with_a_fixed_diagnostic() {
    let s1 = shard("s1");
    let catalog = MockCatalog::new();
    let conf = MockDbConfig::sharding("app", &s1, [s1.clone()]);
    conf.shard_collection(
        &Namespace::new("app", "users"),
        MockChunkManager::new(KeyPattern::single("user_id"), [s1]),
    );
    catalog.add(conf);

    let router = build_router(catalog, MockConnector::new());

    let reply = router
        .run_command("app", &doc! { "convertToCapped" => "users", "size" => 1000 })
        .await;
    assert_eq!(reply.get_f64("ok"), 0.0);
    assert_eq!(
        reply.get_str("errmsg"),
        Some("can't do command: convertToCapped on sharded collection")
    );

    let reply = router
        .run_command(
            "app",
            &doc! { "group" => doc! { "ns" => "users", "key" => doc! { "age" => 1 } } },
        )
        .await;
    assert_eq!(reply.get_f64("ok"), 0.0);
    assert_eq!(
        reply.get_str("errmsg"),
        Some("can't do command: group on sharded collection")
    );
}

#[tokio::test]
async fn group_passes_through_when_unsharded() {
    let s1 = shard("s1");
    let catalog = MockCatalog::new();
    catalog.add(MockDbConfig::unsharded("app", &s1));

    let connector = MockConnector::new();
    connector.push_reply("s1", doc! { "retval" => doc! {}, "count" => 3i64, "ok" => 1.0 });

    let router = build_router(catalog, connector.clone());
    let reply = router
        .run_command(
            "app",
            &doc! { "group" => doc! { "ns" => "users", "key" => doc! { "age" => 1 } } },
        )
        .await;

    assert_eq!(reply.get_f64("ok"), 1.0);
    assert_eq!(connector.commands_for("s1").len(), 1);
}

#[tokio::test]
async fn unknown_commands_are_reported() {
    let router = build_router(MockCatalog::new(), MockConnector::new());
    let reply = router
        .run_command("app", &doc! { "frobnicate" => "users" })
        .await;

    assert_eq!(reply.get_f64("ok"), 0.0);
    assert_eq!(reply.get_str("errmsg"), Some("no such cmd: frobnicate"));
}

#[tokio::test]
async fn registry_resolves_aliases_case_sensitively() {
    let router = build_router(MockCatalog::new(), MockConnector::new());
    let registry = router.registry();

    for name in [
        "count",
        "distinct",
        "drop",
        "dropDatabase",
        "renameCollection",
        "copydb",
        "dbStats",
        "dbstats",
        "collStats",
        "collstats",
        "dataSize",
        "datasize",
        "findAndModify",
        "findandmodify",
        "dropIndexes",
        "deleteIndexes",
        "reIndex",
        "validate",
        "repairDatabase",
        "convertToCapped",
        "group",
        "applyOps",
        "geoNear",
        "filemd5",
        "mapreduce",
    ] {
        let handler = registry
            .resolve(name)
            .unwrap_or_else(|| panic!("missing command {name}"));
        assert!(handler.slave_ok());
        assert_eq!(handler.lock_type(), LockType::None);
    }

    assert!(registry.resolve("Count").is_none());
    assert!(registry.resolve("DBSTATS").is_none());
}

#[tokio::test]
async fn metrics_track_commands_and_failures() {
    let s1 = shard("s1");
    let catalog = MockCatalog::new();
    catalog.add(MockDbConfig::unsharded("app", &s1));

    let connector = MockConnector::new();
    connector.push_reply("s1", doc! { "n" => 1, "ok" => 1.0 });

    let router = build_router(catalog, connector);
    router.run_command("app", &doc! { "count" => "users" }).await;
    router.run_command("app", &doc! { "applyOps" => 1 }).await;

    let snapshot = router.context().metrics().snapshot();
    assert_eq!(snapshot.commands_run, 2);
    assert_eq!(snapshot.failed_commands, 1);
    assert!(snapshot.shard_requests >= 1);
}
