// SPDX-License-Identifier: MIT

pub mod config;
pub mod persistence;
pub mod session;
pub mod tools;
pub mod travel;
pub mod workflow;
