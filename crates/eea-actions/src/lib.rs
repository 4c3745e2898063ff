// crates/eea-actions/src/lib.rs
// ============================================================================
// Crate: eea-actions
// Description: The Action Dispatcher (C6) and Shared Action Context (C7):
// reconciles desired vs. previous alert/remediation state per rule
// evaluation and coalesces per-rule contributions to batched actions.
// ============================================================================

//! ## Overview
//! [`dispatcher::ActionDispatcher`] implements
//! [`eea_evaluator::ActionDispatch`], the seam `eea-evaluator` exposes for
//! its C4-to-C6 handoff. For each rule verdict it chooses a command from
//! `{on, off, do_nothing}` per spec.md §4.6 and issues the corresponding
//! provider call for whichever action kinds the rule type configures:
//! [`handlers::AdvisoryHandler`] for `advisory`, [`handlers::Remediator`]
//! for `remediation`, and [`context::SharedActionContext`] (C7) for
//! `pr_comment`, which batches every failing rule's comment fragment into
//! one aggregate review flushed once per evaluation
//! ([`handlers::PrCommentFlusher`]).
//!
//! The dispatcher never reads [`eea_core::interfaces::EvaluationHistory`]
//! itself: `eea-evaluator` already looks up the prior record and passes it
//! in, so state reconciliation here is a pure function of
//! `(verdict, prior_metadata)`.

pub mod context;
pub mod dispatcher;
pub mod handlers;

pub use context::AggregatingFlusher;
pub use context::SharedActionContext;
pub use dispatcher::ActionDispatcher;
pub use handlers::AdvisoryHandler;
pub use handlers::CommentFragment;
pub use handlers::LoggingRemediator;
pub use handlers::PrCommentFlusher;
pub use handlers::Remediator;
