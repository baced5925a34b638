use crate::common::{Connection, LinkSourceId, OrganizationId, PaginationArgs, WebsiteId};
use crate::domains::link_sources::errors::{LinkSourceError, LinkSourceResult};
use crate::domains::link_sources::models::{Knowledge, LinkSource, LinkSourceFilter};
use crate::domains::link_sources::tree::{build_domain_tree, DomainTreeNode};
use crate::kernel::ServerDeps;

pub async fn get_link_source(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    LinkSource::find_for_organization(link_source_id, organization_id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)
}

/// Newest first, cursor paginated.
pub async fn list_link_sources(
    organization_id: OrganizationId,
    filter: &LinkSourceFilter,
    args: &PaginationArgs,
    deps: &ServerDeps,
) -> LinkSourceResult<Connection<LinkSource>> {
    let pagination = args
        .validate()
        .map_err(|e| LinkSourceError::InvalidInput(e.to_string()))?;

    let rows = LinkSource::list(organization_id, filter, &pagination, &deps.db_pool).await?;
    Ok(Connection::build(rows, pagination.limit, |s| s.id.into_uuid()))
}

/// Pages of every live source of a website, merged by URL path.
pub async fn get_domain_tree(
    organization_id: OrganizationId,
    website_id: WebsiteId,
    deps: &ServerDeps,
) -> LinkSourceResult<Vec<DomainTreeNode>> {
    let sources = LinkSource::find_for_website(organization_id, website_id, &deps.db_pool).await?;
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<LinkSourceId> = sources.iter().map(|s| s.id).collect();
    let pages = Knowledge::find_active_for_sources(&ids, &deps.db_pool).await?;

    Ok(build_domain_tree(&sources, &pages))
}
