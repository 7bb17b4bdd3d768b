// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use maplit::hashset;
use std::collections::HashSet;

use autoupgrade_testing::init_logging;

use crate::directory::RepositoryDescriptor;
use crate::error::{DirectoryError, OrchestrationError, SyncError};
use crate::sync::PullOutcome;
use crate::testing::fixture::{OrgFixture, ORGANIZATION};
use crate::testing::http::CannedResponse;

const WORKING_BRANCH: &str = "autoupgrade-test";
const TRACKED_FILE: &str = "d_1_0/f_3.txt";

#[test]
fn fresh_and_dirty_repositories_end_up_on_the_working_branch() -> Result<()> {
    init_logging();
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    fixture.add_origin("svc-b", "main")?;

    let svc_b = fixture.preclone("svc-b")?;
    svc_b.write_file(TRACKED_FILE, "local drift")?;
    assert!(svc_b.is_dirty()?);
    let upstream_tip = fixture.origin("svc-b")?.write_and_commit_file(
        "CHANGELOG",
        "1.0.1",
        "Release 1.0.1",
    )?;

    let mut config = fixture.config();
    config.reset_local_changes = true;
    config.working_branch = Some(String::from(WORKING_BRANCH));
    let report = fixture.orchestrator(config)?.sync_all(&[])?;

    assert_eq!(report.found, 2);
    assert_eq!(report.synchronized.len(), 2);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.is_success());

    for handle in &report.synchronized {
        assert_eq!(handle.current_branch.as_deref(), Some(WORKING_BRANCH));
        assert_eq!(handle.primary_branch, "main");
        let local = fixture.local(handle.name())?;
        assert_eq!(local.current_branch()?, WORKING_BRANCH);
        assert!(!local.is_dirty()?);
    }

    let svc_a = &report.synchronized[0];
    assert_eq!(svc_a.name(), "svc-a");
    assert!(svc_a.freshly_cloned);
    assert_eq!(svc_a.pull, None);
    assert!(!report.synchronized[1].freshly_cloned);
    assert_eq!(report.synchronized[1].pull, Some(PullOutcome::FastForwarded));

    let svc_b = fixture.local("svc-b")?;
    assert_eq!(svc_b.branch_commit_id(WORKING_BRANCH)?, upstream_tip);
    assert_eq!(svc_b.branch_commit_id("main")?, upstream_tip);
    assert_eq!(
        std::fs::read_to_string(svc_b.path().join(TRACKED_FILE))?,
        "This is test file 3"
    );
    Ok(())
}

#[test]
fn working_branch_starts_at_the_primary_tip() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let tip = fixture.origin("svc-a")?.head_commit_id()?;

    let handle = fixture
        .synchronizer(false, Some(WORKING_BRANCH))
        .sync(fixture.descriptor("svc-a")?, &fixture.sync_root)?;

    let local = fixture.local("svc-a")?;
    assert_eq!(handle.local_path(), fixture.sync_root.join("svc-a"));
    assert_eq!(local.branch_commit_id(WORKING_BRANCH)?, tip);
    assert_eq!(local.branch_commit_id("main")?, tip);
    Ok(())
}

#[test]
fn second_sync_is_a_no_op() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "master")?;
    let synchronizer = fixture.synchronizer(true, Some(WORKING_BRANCH));
    let descriptor = fixture.descriptor("svc-a")?;

    let first = synchronizer.sync(descriptor, &fixture.sync_root)?;
    let local = fixture.local("svc-a")?;
    let head_after_first = local.head_commit_id()?;

    let second = synchronizer.sync(descriptor, &fixture.sync_root)?;
    assert!(first.freshly_cloned);
    assert!(!second.freshly_cloned);
    assert_eq!(first.pull, None);
    assert_eq!(second.pull, Some(PullOutcome::UpToDate));
    assert_eq!(second.primary_branch, "master");
    assert_eq!(second.current_branch.as_deref(), Some(WORKING_BRANCH));
    assert_eq!(local.head_commit_id()?, head_after_first);
    assert_eq!(local.current_branch()?, WORKING_BRANCH);
    assert!(!local.is_dirty()?);
    Ok(())
}

#[test]
fn existing_working_branch_keeps_its_history() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let synchronizer = fixture.synchronizer(false, Some(WORKING_BRANCH));
    let descriptor = fixture.descriptor("svc-a")?;

    synchronizer.sync(descriptor, &fixture.sync_root)?;
    let local = fixture.local("svc-a")?;
    let upgrade_commit =
        local.write_and_commit_file("package-lock.json", "{}", "Upgrade dependencies")?;
    let upstream_tip = fixture
        .origin("svc-a")?
        .write_and_commit_file("README", "hello", "Add README")?;

    let handle = synchronizer.sync(descriptor, &fixture.sync_root)?;
    assert_eq!(handle.current_branch.as_deref(), Some(WORKING_BRANCH));
    assert_eq!(local.branch_commit_id(WORKING_BRANCH)?, upgrade_commit);
    assert_eq!(local.branch_commit_id("main")?, upstream_tip);
    assert!(local.path().join("package-lock.json").is_file());
    Ok(())
}

#[test]
fn without_a_working_branch_the_primary_stays_checked_out() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let local = fixture.preclone("svc-a")?;
    local.create_and_switch_to_branch("feature")?;

    let handle = fixture
        .synchronizer(false, None)
        .sync(fixture.descriptor("svc-a")?, &fixture.sync_root)?;
    assert_eq!(handle.current_branch.as_deref(), Some("main"));
    assert_eq!(local.current_branch()?, "main");
    Ok(())
}

#[test]
fn remote_primary_branch_gets_a_local_branch() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "develop")?;
    let origin = fixture.origin("svc-a")?;
    origin.create_branch("main")?;

    let synchronizer = fixture.synchronizer(false, None);
    let descriptor = fixture.descriptor("svc-a")?.clone();
    let handle = synchronizer.sync(&descriptor, &fixture.sync_root)?;
    assert_eq!(handle.primary_branch, "main");
    let local = fixture.local("svc-a")?;
    assert_eq!(local.current_branch()?, "main");

    // The new local branch tracks origin/main, so a later sync pulls from it.
    origin.switch_to_branch("main")?;
    let upstream_tip = origin.write_and_commit_file("NEWS", "news", "Add NEWS")?;
    synchronizer.sync(&descriptor, &fixture.sync_root)?;
    assert_eq!(local.branch_commit_id("main")?, upstream_tip);
    Ok(())
}

#[test]
fn missing_primary_branch_is_reported() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    fixture.add_origin("svc-trunk", "trunk")?;

    let report = fixture.orchestrator(fixture.config())?.sync_all(&[])?;
    assert_eq!(report.synchronized.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        SyncError::NoPrimaryBranch { name } if name == "svc-trunk"
    ));
    Ok(())
}

#[test]
fn unreachable_repository_does_not_affect_siblings() -> Result<()> {
    init_logging();
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    fixture.add_unreachable("svc-gone")?;
    fixture.add_origin("svc-c", "master")?;

    let mut config = fixture.config();
    config.working_branch = Some(String::from(WORKING_BRANCH));
    let report = fixture.orchestrator(config)?.sync_all(&[])?;

    let synchronized: HashSet<&str> = report.synchronized.iter().map(|h| h.name()).collect();
    assert_eq!(synchronized, hashset! {"svc-a", "svc-c"});
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        SyncError::Clone { name, .. } if name == "svc-gone"
    ));
    assert!(!report.is_success());
    assert!(!fixture.sync_root.join("svc-gone").exists());
    Ok(())
}

#[test]
fn filter_selects_only_named_repositories() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    fixture.add_origin("svc-b", "main")?;
    fixture.add_origin("svc-c", "main")?;

    let filter = vec![
        String::from("svc-c"),
        String::from("svc-a"),
        String::from("svc-unknown"),
    ];
    let report = fixture.orchestrator(fixture.config())?.sync_all(&filter)?;

    assert_eq!(report.found, 3);
    let synchronized: Vec<&str> = report.synchronized.iter().map(|h| h.name()).collect();
    assert_eq!(synchronized, vec!["svc-a", "svc-c"]);
    assert_eq!(report.unmatched, vec![String::from("svc-unknown")]);
    assert!(!fixture.sync_root.join("svc-b").exists());
    Ok(())
}

#[test]
fn conflicting_local_change_fails_the_pull_without_reset() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let local = fixture.preclone("svc-a")?;
    local.write_file(TRACKED_FILE, "local edit")?;
    fixture
        .origin("svc-a")?
        .write_and_commit_file(TRACKED_FILE, "upstream edit", "Edit file 3")?;

    let outcome = fixture
        .synchronizer(false, None)
        .sync(fixture.descriptor("svc-a")?, &fixture.sync_root);
    assert!(matches!(outcome, Err(SyncError::Pull { .. })));
    assert_eq!(
        std::fs::read_to_string(local.path().join(TRACKED_FILE))?,
        "local edit"
    );
    Ok(())
}

#[test]
fn diverged_history_fails_the_pull() -> Result<()> {
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let local = fixture.preclone("svc-a")?;
    local.make_empty_commit("Local only")?;
    fixture.origin("svc-a")?.make_empty_commit("Upstream only")?;

    let outcome = fixture
        .synchronizer(true, None)
        .sync(fixture.descriptor("svc-a")?, &fixture.sync_root);
    match outcome {
        Err(SyncError::Pull { name, branch, .. }) => {
            assert_eq!(name, "svc-a");
            assert_eq!(branch, "main");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    Ok(())
}

#[test]
fn listing_failure_aborts_the_run() -> Result<()> {
    let fixture = OrgFixture::new()?;
    fixture.api.respond(
        &format!("/orgs/{}/repos?per_page=100", ORGANIZATION),
        CannedResponse::status(500, "{}"),
    );

    match fixture.orchestrator(fixture.config())?.sync_all(&[]) {
        Err(OrchestrationError::Directory(DirectoryError::Status { status, .. })) => {
            assert_eq!(status, 500)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!fixture.sync_root.exists());
    Ok(())
}

fn renamed(descriptor: &RepositoryDescriptor, name: &str) -> RepositoryDescriptor {
    RepositoryDescriptor {
        name: name.to_owned(),
        ..descriptor.clone()
    }
}

fn publish(fixture: &OrgFixture, descriptors: &[RepositoryDescriptor]) -> Result<()> {
    fixture.api.respond(
        &format!("/orgs/{}/repos?per_page=100", ORGANIZATION),
        CannedResponse::json(serde_json::to_string(descriptors)?),
    );
    Ok(())
}

#[test]
fn names_that_leave_the_sync_root_are_rejected() -> Result<()> {
    init_logging();
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    let svc_a = fixture.descriptor("svc-a")?.clone();
    let outside = fixture.dir.path().join("escaped");
    publish(
        &fixture,
        &[
            svc_a.clone(),
            renamed(&svc_a, "../escaped"),
            renamed(&svc_a, "nested/svc-a"),
            renamed(&svc_a, &outside.to_string_lossy()),
            renamed(&svc_a, ".."),
        ],
    )?;

    let report = fixture.orchestrator(fixture.config())?.sync_all(&[])?;

    let synchronized: Vec<&str> = report.synchronized.iter().map(|h| h.name()).collect();
    assert_eq!(synchronized, vec!["svc-a"]);
    assert_eq!(report.failures.len(), 4);
    for failure in &report.failures {
        assert!(
            matches!(failure, SyncError::InvalidName { .. }),
            "{:?}",
            failure
        );
    }
    assert!(!outside.exists());
    assert!(!fixture.sync_root.join("nested").exists());
    assert_eq!(std::fs::read_dir(&fixture.sync_root)?.count(), 1);
    Ok(())
}

#[test]
fn repeated_listing_entries_are_synchronized_once() -> Result<()> {
    init_logging();
    let mut fixture = OrgFixture::new()?;
    fixture.add_origin("svc-a", "main")?;
    fixture.add_origin("svc-b", "main")?;
    let svc_a = fixture.descriptor("svc-a")?.clone();
    let svc_b = fixture.descriptor("svc-b")?.clone();
    publish(
        &fixture,
        &[svc_a.clone(), svc_b.clone(), svc_a.clone(), svc_a.clone()],
    )?;

    let orchestrator = fixture.orchestrator(fixture.config())?;
    let report = orchestrator.sync_all(&[])?;
    assert_eq!(report.found, 2);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let synchronized: Vec<&str> = report.synchronized.iter().map(|h| h.name()).collect();
    assert_eq!(synchronized, vec!["svc-a", "svc-b"]);

    let (handles, failures) = orchestrator.sync_descriptors(vec![svc_b.clone(); 4]);
    assert!(failures.is_empty(), "{:?}", failures);
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].pull, Some(PullOutcome::UpToDate));
    Ok(())
}
