// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox runtime contract and its implementations.
//!
//! The instance manager only ever talks to [`SandboxRuntime`]. Isolation and
//! resource limits are the runtime's business.

pub mod mock;
pub mod process;
mod traits;

pub use mock::MockSandbox;
pub use process::{ProcessSandbox, ProcessSandboxConfig};
pub use traits::*;
