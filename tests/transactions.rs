//! Integration tests covering the Engine's end-to-end scenarios:
//! permission enforcement, quota rollback, branch/merge conflict
//! resolution, and policy transform/deny behavior under a mutating
//! workload.

use engine::{AccessContext, EngineError, PolicyFlags, QuotaLimits, QuotaScope};

#[test]
fn non_owner_write_is_permission_denied() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let owner = AccessContext::new(1, 1, engine::context::CAPS_USER);
    let other = AccessContext::new(2, 2, engine::context::CAPS_USER);

    eng.write_file(&owner, "/owned.txt", b"mine", 0).unwrap();
    eng.chmod(&owner, "/owned.txt", 0o600, 1).unwrap();

    let err = eng.write_file(&other, "/owned.txt", b"overwrite", 2);
    assert!(matches!(err, Err(EngineError::PermDenied(_))));
}

#[test]
fn quota_violation_leaves_pool_unchanged() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let ctx = AccessContext::root();
    eng.quota_set(
        &ctx,
        QuotaScope::Volume,
        QuotaLimits {
            max_bytes: Some(4),
            max_refs: None,
            max_views: None,
        },
        0,
    )
    .unwrap();

    let err = eng.write_file(&ctx, "/too-big.txt", b"this is more than four bytes", 1);
    assert!(matches!(err, Err(EngineError::QuotaExceeded(_))));
    assert!(eng.stat(&ctx, "/too-big.txt", 2).is_err());
    let (_, usage) = eng.quota_get(QuotaScope::Volume);
    assert_eq!(usage.bytes, 0);
}

#[test]
fn hardlink_keeps_both_names_live_after_hiding_one() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let ctx = AccessContext::root();
    eng.write_file(&ctx, "/a.txt", b"shared", 0).unwrap();
    eng.hardlink(&ctx, "/a.txt", "/b.txt", 1).unwrap();

    assert_eq!(eng.stat(&ctx, "/a.txt", 2).unwrap().link_count, 2);
    eng.hide(&ctx, "/a.txt", 3).unwrap();
    assert!(eng.stat(&ctx, "/a.txt", 4).is_err());
    assert_eq!(eng.stat(&ctx, "/b.txt", 4).unwrap().length, Some(6));
}

#[test]
fn branch_workflow_with_conflicting_and_independent_changes() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let ctx = AccessContext::root();

    eng.write_file(&ctx, "/shared.txt", b"base", 0).unwrap();
    eng.branch_create(&ctx, "feature", 1).unwrap();

    eng.branch_switch(&ctx, "feature", 1).unwrap();
    eng.write_file(&ctx, "/shared.txt", b"from-feature", 2).unwrap();
    eng.write_file(&ctx, "/feature-only.txt", b"new", 2).unwrap();

    eng.branch_switch(&ctx, "main", 3).unwrap();
    eng.write_file(&ctx, "/shared.txt", b"from-main", 3).unwrap();

    let outcome = eng.branch_merge(&ctx, "feature", "merge-1", 4).unwrap();
    assert_eq!(outcome.conflicts, vec!["/shared.txt".to_string()]);
    assert_eq!(
        eng.stat(&ctx, "/shared.txt", 5).unwrap().length,
        Some("from-main".len() as u64)
    );
    assert!(eng.stat(&ctx, "/feature-only.txt", 5).is_ok());
}

#[test]
fn fs_admin_operation_without_capability_is_denied() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let ctx = AccessContext::new(1000, 1000, engine::context::CAPS_USER);
    let verdict = eng.policy_set_flags(
        &ctx,
        PolicyFlags {
            strict: true,
            audit_all: false,
            verbose: false,
        },
        0,
    );
    assert!(matches!(verdict, Err(EngineError::DeniedByPolicy(_))));
}

#[test]
fn audit_all_records_every_allowed_check() {
    let mut eng = engine::Engine::new(
        engine::Config::new().with_policy_flags(PolicyFlags {
            strict: false,
            audit_all: true,
            verbose: false,
        }),
    );
    let ctx = AccessContext::root();
    eng.write_file(&ctx, "/a.txt", b"x", 0).unwrap();
    eng.stat(&ctx, "/a.txt", 1).unwrap();
    assert!(eng.audit_log().len() >= 2);
}

#[test]
fn symlink_loop_surfaces_through_the_operations_api() {
    let mut eng = engine::Engine::new(engine::Config::new());
    let ctx = AccessContext::root();
    eng.symlink(&ctx, "/b", "/a", 0).unwrap();
    eng.symlink(&ctx, "/a", "/b", 1).unwrap();
    assert!(matches!(
        eng.stat(&ctx, "/a", 2),
        Err(EngineError::LoopDetected(_))
    ));
}
