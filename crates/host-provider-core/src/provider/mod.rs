// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider module - compute back-end abstraction.

pub mod mock;
pub mod registry;
mod traits;

pub use mock::{MockCalls, MockFactory, MockProvider, MockUnit};
pub use registry::{ProviderContext, ProviderFactory, ProviderRegistry};
pub use traits::*;
