//! Drives long-running query jobs from submission to a terminal outcome:
//! submit, poll until the job settles, then fetch its rows or report why it
//! failed, all under one global deadline.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod shutdown;
pub mod ui;
pub mod workflow;
