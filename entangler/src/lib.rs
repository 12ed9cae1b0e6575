// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod config;
pub use config::*;
pub mod metadata;
pub use metadata::Metadata;
pub mod block;
pub mod dag;
pub mod encode;
pub mod getter;
pub mod lattice;
pub mod params;
pub mod repairer;
pub mod strand;
pub mod tree;
pub mod uploader;
pub mod walker;
