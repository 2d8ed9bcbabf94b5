//! Playbook Core — playbook documents, expression evaluator, phase state
//! machine, and the backtest simulator.
//!
//! This crate contains the deterministic heart of the system:
//! - Domain types (bars, playbook documents, condition trees, positions, trades)
//! - The restricted expression language and its per-bar evaluator
//! - Playbook compilation with collect-everything validation
//! - The phase state machine shared by live and backtest execution
//! - The historical bar feed and the bar-by-bar simulator
//!
//! Everything here is pure and single-threaded per run: inputs arrive in
//! full, no global state, identical inputs give byte-identical outputs.

pub mod domain;
pub mod engine;
pub mod expr;
pub mod feed;
pub mod sim;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: run inputs and outputs are Send + Sync, so the
    /// runner can fan simulations out across a thread pool.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Playbook>();
        require_sync::<domain::Playbook>();
        require_send::<domain::Trade>();
        require_sync::<domain::Trade>();
        require_send::<domain::OpenPosition>();
        require_sync::<domain::OpenPosition>();

        require_send::<engine::CompiledPlaybook>();
        require_sync::<engine::CompiledPlaybook>();
        require_send::<engine::RuntimeState>();
        require_sync::<engine::RuntimeState>();
        require_send::<engine::Diagnostic>();
        require_sync::<engine::Diagnostic>();

        require_send::<feed::BarSeries>();
        require_sync::<feed::BarSeries>();
        require_send::<sim::SimReport>();
        require_sync::<sim::SimReport>();
        require_send::<sim::SimParams>();
        require_sync::<sim::SimParams>();
    }
}
