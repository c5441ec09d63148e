// The query-plugin capability and its name registry.
//
// Plugins implement rewrite passes over the parsed statement and the
// concrete plan. The pipeline instantiates them by name, in a fixed order,
// fresh for every query (plugins may hold per-query state).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::plan::context::QueryContext;
use crate::query::SelectStmt;

/// The three statements a physical rewrite sees. `parallel` is executed per
/// chunk; `merge` combines the partial results. `has_merge` flips to true
/// the first time a plugin puts real work into the merge side.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub parallel: SelectStmt,
    pub merge: SelectStmt,
    pub has_merge: bool,
}

impl PhysicalPlan {
    pub fn new(parallel: SelectStmt) -> Self {
        PhysicalPlan {
            parallel,
            merge: SelectStmt::default(),
            has_merge: false,
        }
    }
}

/// A rewrite pass. Both hooks default to no-ops so a plugin implements only
/// the phase it cares about.
pub trait QueryPlugin: Send {
    fn name(&self) -> &'static str;

    /// Called once before the pipeline runs.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Act on the parsed, not-yet-planned statement.
    fn apply_logical(&mut self, _stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    /// Act on the concrete plan.
    fn apply_physical(&mut self, _plan: &mut PhysicalPlan, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }
}

type PluginCtor = fn() -> Box<dyn QueryPlugin>;

/// Registration-by-name factory for plugins, plus the pipeline order.
pub struct PluginRegistry {
    ctors: HashMap<&'static str, PluginCtor>,
    order: Vec<&'static str>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        PluginRegistry {
            ctors: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The standard pipeline. Order matters: the match-table pass depends on
    /// the table pass's annotations, and the post-processing pass must see
    /// the aggregate rewrite's select lists.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        reg.register("table", || {
            Box::new(crate::plan::table_plugin::TablePlugin::new())
        });
        reg.register("match-table", || {
            Box::new(crate::plan::match_table_plugin::MatchTablePlugin::new())
        });
        reg.register("aggregate", || {
            Box::new(crate::plan::aggregate_plugin::AggregatePlugin::new())
        });
        reg.register("post", || {
            Box::new(crate::plan::post_plugin::PostPlugin::new())
        });
        reg.register("scan-table", || {
            Box::new(crate::plan::scan_table_plugin::ScanTablePlugin::new())
        });
        reg
    }

    pub fn register(&mut self, name: &'static str, ctor: PluginCtor) {
        if self.ctors.insert(name, ctor).is_none() {
            self.order.push(name);
        }
    }

    pub fn new_instance(&self, name: &str) -> Result<Box<dyn QueryPlugin>> {
        self.ctors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| Error::Planning(format!("no such query plugin: {name}")))
    }

    /// Fresh instances of every registered plugin, pipeline order.
    pub fn instantiate_all(&self) -> Result<Vec<Box<dyn QueryPlugin>>> {
        self.order.iter().map(|n| self.new_instance(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_order() {
        let reg = PluginRegistry::standard();
        let plugins = reg.instantiate_all().unwrap();
        let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["table", "match-table", "aggregate", "post", "scan-table"]
        );
    }

    #[test]
    fn unknown_plugin_is_planning_error() {
        let reg = PluginRegistry::standard();
        assert!(reg.new_instance("nope").is_err());
    }
}
