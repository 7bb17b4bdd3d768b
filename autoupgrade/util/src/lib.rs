// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod app;
pub mod git_helper;
pub mod paths;
pub mod process;
pub mod retry;
pub mod sandbox;
pub mod sandbox_command;
