pub mod fetcher;
pub mod outcome;
pub mod pipeline;
pub mod queue;
pub mod records;
pub mod redis_queue;
pub mod search;
pub mod status;
pub mod tagging;
pub mod worker;
