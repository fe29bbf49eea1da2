pub mod opportunity;
pub mod generator;

pub use opportunity::{
    Capability, Competition, CostModel, EquipmentClass, LoadFilter, Opportunity, Profitability, Urgency,
};
pub use generator::OpportunityGenerator;
