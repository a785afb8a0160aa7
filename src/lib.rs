// SPDX-License-Identifier: MIT

//! Resumable workflow execution for travel planning
//!
//! `wdk` holds the contracts nodes and tools implement; `wayfarer` holds the
//! graph compiler, execution engine, checkpoint stores and the travel domain.

pub mod wayfarer;
pub mod wdk;
