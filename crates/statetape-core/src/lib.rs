//! Configuration, producers and the run loop that drive a statetape log.
//!
//! The log itself lives in `statetape-log`; this crate supplies the
//! collaborators around it: a YAML configuration, a family of
//! Markov-chain producers that emit one state per step, and a run loop
//! that opens a collector with those producers, drives them for a number of
//! steps, and reports how much the log deduplicated.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `statetape-config.yaml` into
//!   strongly-typed structs.
//! - [`markov`] -- [`TransitionMatrix`] and the [`MarkovProducer`].
//! - [`runner`] -- [`run_simulation`] and its [`RunSummary`].
//!
//! [`TransitionMatrix`]: markov::TransitionMatrix
//! [`MarkovProducer`]: markov::MarkovProducer
//! [`run_simulation`]: runner::run_simulation
//! [`RunSummary`]: runner::RunSummary

pub mod config;
pub mod markov;
pub mod runner;
