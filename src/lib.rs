//! # Training Feedback
//!
//! The training-feedback loop for AI-assisted bid line-item extraction.
//!
//! Reviewers correct line items the extraction model got wrong. Each
//! correction is anonymized and stored as a pending contribution; once a
//! moderator approves it, it feeds three background jobs that improve the
//! next extraction run.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌───────────────┐
//! │ Correction │──▶│ Anonymizer │──▶│ contributions │
//! └────────────┘   └────────────┘   └───────┬───────┘
//!                                           │ approved
//!                  ┌────────────────────────┼────────────────────┐
//!                  ▼                        ▼                    ▼
//!          ┌──────────────┐        ┌──────────────┐      ┌──────────────┐
//!          │   Pattern    │        │  Threshold   │      │  Embedding   │
//!          │   Analyzer   │        │  Calibrator  │      │   Indexer    │
//!          └──────┬───────┘        └──────┬───────┘      └──────┬───────┘
//!                 ▼                       ▼                     ▼
//!           active rules          per-trade cutoffs        Retriever
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tfb init                          # create database
//! tfb contribute corrections.json   # store pending corrections
//! tfb moderate <id> approve
//! tfb nightly                       # mine patterns, calibrate thresholds
//! tfb embed pending --drain         # index approved corrections
//! tfb retrieve "copper wire" --trade electrical
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`anonymize`] | Regex redaction and price bucketing |
//! | [`contribute`] | Intake, moderation, line-item diffing |
//! | [`patterns`] | Pattern analyzer and prompt rules |
//! | [`calibrate`] | Confidence threshold calibration |
//! | [`indexer`] | Embedding indexer |
//! | [`retriever`] | Similar-correction retrieval |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod anonymize;
pub mod calibrate;
pub mod config;
pub mod contribute;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod nightly;
pub mod patterns;
pub mod retriever;
pub mod stats;
pub mod store;
pub mod text;

#[cfg(test)]
mod testutil;
