//! Inbound report ingestion (§6.3): the one gRPC surface workers call back into.
//!
//! Grounded in `examples/original_source/kubekarma/controlleroperator/grpcserver.py`'s
//! `SubmitReport` handler (fan out to the publisher, reply with a short message) and the
//! teacher's `actix_web`-handler style for the thin-adapter shape; the health service
//! itself is wired with `tonic-health` rather than hand-rolled, per §6.3's "Ambient" note.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use testguard_proto::report_ingestion_server::{ReportIngestion, ReportIngestionServer};
use testguard_proto::{ReportReply, ReportRequest};

use crate::hub::ResultsHub;

pub struct ReportIngestionService {
    hub: Arc<ResultsHub>,
}

impl ReportIngestionService {
    pub fn new(hub: Arc<ResultsHub>) -> ReportIngestionServer<Self> {
        ReportIngestionServer::new(Self { hub })
    }
}

#[tonic::async_trait]
impl ReportIngestion for ReportIngestionService {
    async fn submit_report(
        &self,
        request: Request<ReportRequest>,
    ) -> Result<Response<ReportReply>, Status> {
        let report = request.into_inner();
        if report.execution_id.is_empty() {
            return Err(Status::invalid_argument("execution_id must not be empty"));
        }
        info!(execution_id = %report.execution_id, cases = report.test_case_results.len(), "report received");
        self.hub.publish(&report.execution_id, &report).await;
        Ok(Response::new(ReportReply {
            message: format!("accepted report for {}", report.execution_id),
        }))
    }
}

/// Builds the `grpc.health.v1.Health` service, reporting the `ReportIngestion` service
/// as always-serving once the gRPC server itself is up (no downstream dependency to
/// degrade on).
pub async fn health_service() -> (
    tonic_health::server::HealthReporter,
    tonic_health::pb::health_server::HealthServer<impl tonic_health::pb::health_server::Health>,
) {
    let (reporter, service) = tonic_health::server::health_reporter();
    reporter
        .set_serving::<ReportIngestionServer<ReportIngestionService>>()
        .await;
    (reporter, service)
}
