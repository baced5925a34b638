//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod firecrawl_client;
pub mod jobs;
pub mod nats;
pub mod service_host;
pub mod test_dependencies;
pub mod traits;

pub use deps::ServerDeps;
pub use firecrawl_client::{FirecrawlClient, FIRECRAWL_API_URL};
pub use nats::{NatsClientPublisher, NatsPublisher, PublishedMessage, TestNats};
pub use service_host::{Service, ServiceHost};
pub use test_dependencies::{FailingJobQueue, MockCrawlProvider, TestDependencies};
pub use traits::*;
