pub mod optimizer;
pub mod catalog;

pub use optimizer::{
    BoardOptimization, BoardOptimizer, BoardWeights, CostStructure, FactorBreakdown, RegionProfile, RegionalBoard,
};
