// Query planning: the plugin pipeline that turns one parsed SELECT into a
// per-chunk parallel template, a merge statement, and the chunk coverage.

pub mod aggregate_plugin;
pub mod context;
pub mod mapping;
pub mod match_table_plugin;
pub mod planner;
pub mod plugin;
pub mod post_plugin;
pub mod scan_table_plugin;
pub mod table_plugin;

pub use context::QueryContext;
pub use mapping::{ChunkSpec, ChunkSpecSingle, Parameter, QueryMapping};
pub use planner::{Plan, Planner};
pub use plugin::{PhysicalPlan, PluginRegistry, QueryPlugin};
