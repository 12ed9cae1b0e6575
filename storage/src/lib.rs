// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod storage;
pub use storage::*;

pub mod cluster;
pub mod http;
pub mod mock;
