//! Prometheus metrics for the relayer
//!
//! Exposed on /metrics by the API server. Chains are labelled by bridge
//! chain id.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};

use crate::types::ChainId;

lazy_static! {
    // Listener metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "relayer_blocks_processed_total",
        "Total number of blocks processed",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_latest_block",
        "Latest block number processed",
        &["chain"]
    ).unwrap();

    pub static ref DEPOSITS_DETECTED: CounterVec = register_counter_vec!(
        "relayer_deposits_detected_total",
        "Total number of deposit events detected",
        &["chain"]
    ).unwrap();

    // Writer metrics
    pub static ref VOTES_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_votes_submitted_total",
        "Total number of vote transactions submitted",
        &["chain", "status"]
    ).unwrap();

    pub static ref EXECUTIONS_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_executions_submitted_total",
        "Total number of execute transactions submitted",
        &["chain", "status"]
    ).unwrap();

    pub static ref PROPOSALS_SKIPPED: CounterVec = register_counter_vec!(
        "relayer_proposals_skipped_total",
        "Proposals skipped because they were terminal or already voted",
        &["chain", "reason"]
    ).unwrap();

    pub static ref WRITER_QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "relayer_writer_queue_depth",
        "Messages waiting in a writer queue",
        &["chain"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    pub static ref FATAL_ERRORS: CounterVec = register_counter_vec!(
        "relayer_fatal_errors_total",
        "Components that exhausted their retry budget",
        &["chain"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

fn label(chain: ChainId) -> String {
    chain.to_string()
}

/// Record a block processed
pub fn record_block_processed(chain: ChainId, block_number: u64) {
    let chain = label(chain);
    BLOCKS_PROCESSED.with_label_values(&[&chain]).inc();
    LATEST_BLOCK
        .with_label_values(&[&chain])
        .set(block_number as f64);
}

/// Record a deposit detected
pub fn record_deposit_detected(chain: ChainId) {
    DEPOSITS_DETECTED.with_label_values(&[&label(chain)]).inc();
}

/// Record a vote submission attempt
pub fn record_vote_submitted(chain: ChainId, success: bool) {
    let status = if success { "success" } else { "failure" };
    VOTES_SUBMITTED
        .with_label_values(&[&label(chain), status])
        .inc();
}

/// Record an execute submission attempt
pub fn record_execution_submitted(chain: ChainId, success: bool) {
    let status = if success { "success" } else { "failure" };
    EXECUTIONS_SUBMITTED
        .with_label_values(&[&label(chain), status])
        .inc();
}

/// Record a proposal that needed no transaction
pub fn record_proposal_skipped(chain: ChainId, reason: &str) {
    PROPOSALS_SKIPPED
        .with_label_values(&[&label(chain), reason])
        .inc();
}

pub fn set_writer_queue_depth(chain: ChainId, depth: usize) {
    WRITER_QUEUE_DEPTH
        .with_label_values(&[&label(chain)])
        .set(depth as f64);
}

/// Record an error
pub fn record_error(chain: ChainId, error_type: &str) {
    ERRORS.with_label_values(&[&label(chain), error_type]).inc();
}

pub fn record_fatal_error(chain: ChainId) {
    FATAL_ERRORS.with_label_values(&[&label(chain)]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled_by_chain() {
        record_deposit_detected(201);
        record_deposit_detected(201);
        assert!(DEPOSITS_DETECTED.with_label_values(&["201"]).get() >= 2.0);
    }

    #[test]
    fn test_block_gauge_tracks_latest() {
        record_block_processed(202, 77);
        assert_eq!(LATEST_BLOCK.with_label_values(&["202"]).get(), 77.0);
    }
}
