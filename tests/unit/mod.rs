mod metric_scenarios;
mod reconciler_properties;
