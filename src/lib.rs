//! webagent - completes natural-language tasks by driving a web browser.
//!
//! A command arrives over HTTP, the task execution loop asks the planning
//! oracle for the next step, dispatches tool invocations against a live
//! browser session, and feeds each observation back until the planner
//! produces a final answer or a budget runs out.

pub mod api;
pub mod browser;
pub mod config;
pub mod llm;
pub mod planner;
pub mod runner;
pub mod task;
pub mod tools;
