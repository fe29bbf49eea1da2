pub mod agent;

pub use agent::{
    build_oracle, evaluate_with_fallback, fallback_verdict, LocalHeuristicOracle, OracleContext, OracleVerdict,
    RemoteOracle, ScoringOracle, VerdictSource,
};
