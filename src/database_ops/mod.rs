pub mod catalog_store;
pub mod city_ingest;
pub mod db;
pub mod vk;
pub mod worker_pool;
