// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
pub mod fixture;

#[cfg(test)]
pub mod http;

#[cfg(test)]
pub mod scenario;
