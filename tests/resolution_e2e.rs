//! End-to-end name resolution through `SeenService`.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;

use common::World;
use seendb::{AliasNotice, Clock, IdentityId, IdentityStore, Query, QueryStatus, ResolvedVia};

#[test]
fn connect_is_idempotent_for_names() {
    let world = World::new();
    let a = IdentityId::new();

    let first = world.clock.now();
    world.connect(a, "Alice");
    world.connect(a, "Alice");
    world.connect(a, "alice");

    let history = world.store.get_history(a, None).unwrap();
    assert_eq!(history, vec!["Alice".to_string()]);

    let record = world.store.get_record(a).unwrap().unwrap();
    assert_eq!(record.first_seen, first);
    assert_eq!(record.last_seen, first + Duration::minutes(2));
}

#[test]
fn lookups_ignore_case() {
    let world = World::new();
    let b = IdentityId::new();
    world.connect(b, "Bob");

    let result = world.service.query(&Query::name("bOB"));
    assert_eq!(result.status, QueryStatus::Resolved);
    assert_eq!(result.identity_id, Some(b));
    assert!(result.alias.is_none(), "case difference is not a rename");
}

#[test]
fn unique_old_name_resolves_with_alias() {
    let world = World::new();
    let a = IdentityId::new();
    world.connect(a, "Alice");
    world.connect(a, "Alicia");
    world.authority.set_name(a, "Alicia");

    let result = world.service.query(&Query::name("Alice"));
    assert_eq!(result.status, QueryStatus::Resolved);
    assert_eq!(result.identity_id, Some(a));
    assert_eq!(result.resolved_via, Some(ResolvedVia::UniqueHistory));
    assert_eq!(result.resolved_current_name.as_deref(), Some("Alicia"));
    assert_eq!(
        result.alias,
        Some(AliasNotice {
            old_name: "Alice".to_string(),
            current_name: "Alicia".to_string(),
        })
    );
    assert_eq!(result.previous_names, vec!["Alice".to_string()]);
}

#[test]
fn ambiguity_resolved_by_current_name() {
    let world = World::new();
    let x = IdentityId::new();
    let y = IdentityId::new();
    world.connect(y, "Carl");
    world.connect(x, "Carl");
    world.authority.set_name(x, "Carl");
    world.authority.set_name(y, "Carl2");

    let result = world.service.query(&Query::name("carl"));
    assert_eq!(result.status, QueryStatus::Resolved);
    assert_eq!(result.identity_id, Some(x));
    assert_eq!(result.resolved_via, Some(ResolvedVia::CurrentHolder));
    assert!(result.alias.is_none());
}

#[test]
fn true_ambiguity_lists_current_names() {
    let world = World::new();
    let x = IdentityId::new();
    let y = IdentityId::new();
    let z = IdentityId::new();
    world.connect(x, "Dan");
    world.connect(y, "Dan");
    world.connect(z, "Dan");
    world.authority.set_name(x, "Daniel");
    world.authority.set_name(y, "Danny");
    world.authority.set_name(z, "DANIEL");

    let result = world.service.query(&Query::name("Dan"));
    assert_eq!(result.status, QueryStatus::Ambiguous);
    assert_eq!(
        result.ambiguous_candidates,
        vec!["Daniel".to_string(), "Danny".to_string()]
    );
    assert!(result.identity_id.is_none());
}

#[test]
fn remote_outage_falls_back_to_local_history() {
    let world = World::new();
    let x = IdentityId::new();
    let y = IdentityId::new();
    world.connect(x, "Eve");
    world.connect(x, "Eve2");
    world.connect(y, "Eve");
    world.authority.set_down(true);

    let result = world.service.query(&Query::name("eve"));
    assert_eq!(result.status, QueryStatus::Resolved);
    assert_eq!(result.identity_id, Some(y));
    assert!(!result.data_unavailable);
}

#[test]
fn never_seen_is_unknown() {
    let world = World::new();
    world.connect(IdentityId::new(), "Someone");

    let result = world.service.query(&Query::name("Nobody"));
    assert_eq!(result.status, QueryStatus::Unknown);
    assert!(result.ambiguous_candidates.is_empty());
    assert!(!result.data_unavailable);
    assert_eq!(world.authority.calls(), 0);
}

#[test]
fn connected_identity_skips_remote() {
    let world = World::new();
    let a = IdentityId::new();
    let b = IdentityId::new();
    world.connect(a, "Frank");
    world.connect(b, "Frank");
    world.presence.connect(b, "Frank");

    let result = world.service.query(&Query::name("frank"));
    assert_eq!(result.identity_id, Some(b));
    assert_eq!(result.resolved_via, Some(ResolvedVia::Connected));
    assert!(result.online);
    assert_eq!(world.authority.calls(), 0);
}

#[test]
fn cache_expiry_triggers_one_refetch() {
    let world = World::new();
    let x = IdentityId::new();
    let y = IdentityId::new();
    world.connect(x, "Gil");
    world.connect(y, "Gil");
    world.authority.set_name(x, "Gil");
    world.authority.set_name(y, "Gilbert");

    world.service.query(&Query::name("Gil"));
    let after_first = world.authority.calls();
    assert!(after_first >= 1);

    world.service.query(&Query::name("Gil"));
    assert_eq!(world.authority.calls(), after_first, "served from cache");

    world.clock.advance(Duration::minutes(10) + Duration::seconds(1));
    world.service.query(&Query::name("Gil"));
    // x is scanned first and matches, so only x is refetched.
    assert_eq!(world.authority.calls(), after_first + 1);
}

#[test]
fn concurrent_resolves_share_one_remote_call() {
    let world = World::new();
    let id = IdentityId::new();
    world.authority.set_name(id, "Hana");
    world.authority.set_latency(std::time::Duration::from_millis(100));

    let cache = Arc::clone(world.service.cache());
    let barrier = Arc::new(Barrier::new(10));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.resolve(id)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outcomes.iter().all(|o| o.as_deref() == Some("Hana")));
    assert_eq!(world.authority.calls(), 1);
}

#[test]
fn self_query_reports_history_and_session() {
    let world = World::new();
    let me = IdentityId::new();
    world.connect(me, "Ivy");
    world.connect(me, "Ivy_");
    let joined = world.clock.now();
    world.service.on_connection_observed(me, "Ivy_");
    world.presence.connect(me, "Ivy_");
    world.clock.advance(Duration::minutes(5));

    let result = world.service.query(&Query::Identity(me));
    assert_eq!(result.status, QueryStatus::Resolved);
    assert_eq!(result.resolved_current_name.as_deref(), Some("Ivy_"));
    assert_eq!(result.previous_names, vec!["Ivy".to_string()]);
    assert_eq!(result.online_for(world.clock.now()), Some(Duration::minutes(5)));
    assert_eq!(result.last_seen, Some(joined));
}
