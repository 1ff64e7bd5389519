// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core library for the local multi-account email workstation backend:
//! unified store, provider adapters, sync engine, search, rules engine and
//! the stateless operation facade a driver process calls into.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod provider;
pub mod rules;
pub mod search;
pub mod store;
pub mod sync;
pub mod vault;

pub mod prelude {
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::store::models::*;
    pub use crate::store::Store;
}
