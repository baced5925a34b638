//! Link source actions - request-level operations, scoped to one organization
//!
//! Every action takes the caller's `OrganizationId`; a source belonging to a
//! different organization is reported as `NotFound`.

mod crawl_control;
mod create;
mod pages;
mod queries;

pub use crawl_control::{
    cancel_crawl, delete_link_source, recrawl_link_source, scan_subpages, update_link_source,
    CANCELLED_MESSAGE,
};
pub use create::{create_link_source, CreateLinkSourceInput, ENQUEUE_FAILED_MESSAGE};
pub use pages::{ignore_url, reindex_page, set_knowledge_included};
pub use queries::{get_domain_tree, get_link_source, list_link_sources};

use crate::domains::link_sources::models::LinkSource;
use crate::domains::realtime::{EventScope, RealtimeEvent};
use crate::kernel::ServerDeps;

async fn emit_updated(source: &LinkSource, deps: &ServerDeps) {
    deps.realtime
        .emit(&EventScope::from(source), RealtimeEvent::link_source_updated(source))
        .await;
}
