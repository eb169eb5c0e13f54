use super::{describe_not_found, path_segment, CallContext, ServiceFacade};
use crate::client::{ResilientClient, ServiceRequest};
use crate::Result;
use serde_json::{json, Value};

/// Splits free-form commands into steps and produces ALT files.
#[derive(Clone)]
pub struct SegmentationService {
    client: ResilientClient,
}

impl SegmentationService {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub async fn segment_command(
        &self,
        command: &str,
        options: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        self.invoke(
            ServiceRequest::post("/segment").json(json!({
                "command": command,
                "options": options_or_empty(options),
            })),
            ctx,
        )
        .await
    }

    pub async fn get_segmentation_status(
        &self,
        segmentation_id: &str,
        ctx: &CallContext,
    ) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/segment/{}", path_segment(segmentation_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "Segmentation process", segmentation_id))
    }

    pub async fn create_alt_file(&self, data: Value, ctx: &CallContext) -> Result<Value> {
        self.invoke(ServiceRequest::post("/files/alt").json(data), ctx)
            .await
    }

    pub async fn get_alt_file(&self, alt_file_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/files/alt/{}", path_segment(alt_file_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "ALT file", alt_file_id))
    }
}

impl ServiceFacade for SegmentationService {
    fn service_name(&self) -> &str {
        self.client.service()
    }

    fn client(&self) -> &ResilientClient {
        &self.client
    }
}

pub(crate) fn options_or_empty(options: Value) -> Value {
    if options.is_null() {
        json!({})
    } else {
        options
    }
}
