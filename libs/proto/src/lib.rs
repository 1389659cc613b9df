//! Generated gRPC types for the report-ingestion wire protocol.

tonic::include_proto!("testguard.v1");
