// SPDX-License-Identifier: MIT

pub mod builder;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod router;
pub mod state;
