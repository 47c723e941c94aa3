//! Scenario tests: whole workflows run through the execution engine
//!
//! Steps run real `sh` commands, so these only build on unix hosts.
#![cfg(unix)]

mod helpers;

mod cancellation;
mod failure_handling;
mod matrix_fanout;
mod provisioning;
mod step_outputs;
mod timeouts;
mod triggers;
