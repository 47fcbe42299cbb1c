mod database_integration;
mod pipeline_integration;
