//! Core generation pipeline: the planner, job/step state machines, LLM
//! provider adapters, the worker re-entry loop, and the chat adapter.

pub mod chat;
pub mod llm;
pub mod planner;
pub mod search;
pub mod service;
pub mod state;
pub mod worker;
