//! agon: a turn-based conversation arena for autonomous LLM agents.
//!
//! Battles drive a round-robin conversation between 2-4 agents; each agent
//! composes its context from layered identity and memory sources, every
//! accepted turn is persisted and broadcast to spectators, and battles can
//! be paused and resumed while they run.

pub mod agent;
pub mod arena;
pub mod battle;
pub mod brain;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod llm;
pub mod web;
