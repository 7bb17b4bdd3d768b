// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::Result;

use autoupgrade_operations::directory::RepositoryDescriptor;
use autoupgrade_operations::orchestrator::SyncReport;
use autoupgrade_operations::upgrade::UpgradeReport;
use autoupgrade_util::app::ExitCode;

pub fn print_listing(out: &mut impl Write, descriptors: &[RepositoryDescriptor]) -> Result<()> {
    let mut sorted: Vec<&RepositoryDescriptor> = descriptors.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for descriptor in sorted {
        writeln!(
            out,
            "{}\t{}\t{}",
            descriptor.name, descriptor.id, descriptor.clone_url
        )?;
    }
    Ok(())
}

pub fn print_sync_report(out: &mut impl Write, report: &SyncReport) -> Result<()> {
    writeln!(
        out,
        "Found {} repositories: {} synchronized, {} failed",
        report.found,
        report.synchronized.len(),
        report.failures.len()
    )?;
    if !report.unmatched.is_empty() {
        writeln!(out, "Not in the organization: {}", report.unmatched.join(", "))?;
    }
    for failure in &report.failures {
        writeln!(out, "  sync failed: {}", failure)?;
    }
    Ok(())
}

pub fn print_upgrade_report(out: &mut impl Write, report: &UpgradeReport) -> Result<()> {
    writeln!(
        out,
        "Upgraded {} repositories, {} not applicable, {} failed",
        report.upgraded.len(),
        report.not_applicable.len(),
        report.failures.len()
    )?;
    for failure in &report.failures {
        writeln!(out, "  upgrade failed: {}", failure)?;
    }
    Ok(())
}

pub fn exit_code(sync: &SyncReport, upgrade: Option<&UpgradeReport>) -> ExitCode {
    let upgraded_cleanly = upgrade.map_or(true, UpgradeReport::is_success);
    if sync.is_success() && upgraded_cleanly {
        ExitCode::SUCCESS
    } else {
        ExitCode::PARTIAL_FAILURE
    }
}
