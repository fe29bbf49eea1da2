pub mod lane;
pub mod catalog;

pub use lane::{seasonal_influence, Lane, MarketModel, RouteConditions};
