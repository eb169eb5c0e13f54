use super::{describe_not_found, path_segment, CallContext, ServiceFacade};
use crate::client::{ResilientClient, ServiceRequest};
use crate::Result;
use serde_json::{json, Value};

/// Stores task results and serves ATLAS files.
#[derive(Clone)]
pub struct ArchiveService {
    client: ResilientClient,
}

impl ArchiveService {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub async fn archive_result(
        &self,
        last_file_id: &str,
        metadata: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let metadata = if metadata.is_null() { json!({}) } else { metadata };
        self.invoke(
            ServiceRequest::post("/archive").json(json!({
                "lastFileId": last_file_id,
                "metadata": metadata,
            })),
            ctx,
        )
        .await
    }

    /// The query document is forwarded as-is.
    pub async fn search_archive(&self, query: Value, ctx: &CallContext) -> Result<Value> {
        self.invoke(ServiceRequest::post("/search").json(query), ctx)
            .await
    }

    pub async fn get_archive_item(&self, archive_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/items/{}", path_segment(archive_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "Archive item", archive_id))
    }

    pub async fn get_atlas_file(&self, atlas_file_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/files/atlas/{}", path_segment(atlas_file_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "ATLAS file", atlas_file_id))
    }
}

impl ServiceFacade for ArchiveService {
    fn service_name(&self) -> &str {
        self.client.service()
    }

    fn client(&self) -> &ResilientClient {
        &self.client
    }
}
