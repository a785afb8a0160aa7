// SPDX-License-Identifier: MIT

pub mod file_writer;

pub use file_writer::FileWriterTool;
