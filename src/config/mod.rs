mod defaults;
mod disklist;
mod parser;
mod settings;
mod validation;

pub(crate) use disklist::parse_disklist;
pub use settings::PlannerConfig;
