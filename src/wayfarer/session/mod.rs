// SPDX-License-Identifier: MIT

//! Sessions: lifecycle model and the manager that drives them

pub mod manager;
pub mod model;

pub use manager::SessionManager;
pub use model::{Session, SessionStatus};
