// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod primary_branch;
pub mod repository;
pub mod sync;
pub(crate) mod testing;
pub mod upgrade;
