use super::segmentation::options_or_empty;
use super::{describe_not_found, path_segment, CallContext, ServiceFacade};
use crate::client::{ResilientClient, ServiceRequest};
use crate::Result;
use serde_json::{json, Value};

/// Executes ALT files as tasks and produces LAST files.
#[derive(Clone)]
pub struct RunnerService {
    client: ResilientClient,
}

impl RunnerService {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub async fn run_task(
        &self,
        alt_file_id: &str,
        options: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        self.invoke(
            ServiceRequest::post("/run").json(json!({
                "altFileId": alt_file_id,
                "options": options_or_empty(options),
            })),
            ctx,
        )
        .await
    }

    pub async fn get_task_status(&self, task_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/tasks/{}", path_segment(task_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "Task", task_id))
    }

    pub async fn cancel_task(&self, task_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::post(format!("/tasks/{}/cancel", path_segment(task_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "Task", task_id))
    }

    pub async fn get_last_file(&self, last_file_id: &str, ctx: &CallContext) -> Result<Value> {
        self.invoke(
            ServiceRequest::get(format!("/files/last/{}", path_segment(last_file_id))),
            ctx,
        )
        .await
        .map_err(|e| describe_not_found(e, "LAST file", last_file_id))
    }
}

impl ServiceFacade for RunnerService {
    fn service_name(&self) -> &str {
        self.client.service()
    }

    fn client(&self) -> &ResilientClient {
        &self.client
    }
}
