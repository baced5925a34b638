// Business domains
pub mod crawling;
pub mod link_sources;
pub mod quota;
pub mod realtime;
