pub(crate) mod counter_app;

pub(crate) mod logging;

pub(crate) mod mem_pool;

pub(crate) mod mem_storage;

pub(crate) mod network;

pub(crate) mod node;
