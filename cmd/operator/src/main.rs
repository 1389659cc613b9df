use std::sync::Arc;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;

use testguard_k8s_util::new_client_with_metrics;
use testguard_operator::grpc::{health_service, ReportIngestionService};
use testguard_operator::metrics::Metrics;
use testguard_operator::scheduler::Scheduler;
use testguard_operator::suite::cronjob::WorkerConfig;
use testguard_operator::suite::{self, State};
use testguard_operator::telemetry;

#[get("/metrics")]
async fn metrics(state: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(state.metrics_text())
}

#[get("/healthz")]
async fn healthz(state: Data<State>, _req: HttpRequest) -> impl Responder {
    if state.scheduler_alive() {
        HttpResponse::Ok().json("healthy")
    } else {
        HttpResponse::ServiceUnavailable().json("scheduler thread not running")
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "testguard-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Port the gRPC report-ingestion server listens on.
    #[arg(long, default_value_t = 8080, env = "GRPC_PORT")]
    grpc_port: u32,

    /// Port the HTTP server (health + metrics) listens on.
    #[arg(long, default_value_t = 8000, env = "HTTP_PORT")]
    http_port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env = "LOG_FILTER")]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env = "LOG_FORMAT")]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint. If unset, tracing is disabled.
    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(long, default_value_t = 0.1, env = "SAMPLE_RATIO")]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    // `LOG_LEVEL` is the original system's log-level variable; honored as a fallback when
    // `--log-filter`/`LOG_FILTER` was left at its default.
    let log_filter = match std::env::var("LOG_LEVEL") {
        Ok(level) if args.log_filter == "info" => level,
        _ => args.log_filter.clone(),
    };

    telemetry::init(
        &log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let worker_config = WorkerConfig {
        worker_image: std::env::var("WORKER_DOCKER_IMAGE")
            .unwrap_or_else(|_| "ghcr.io/example/testguard-worker:latest".to_string()),
        controller_server_host: std::env::var("EXPOSED_CONTROLLER_GRPC_ADDRESS")
            .unwrap_or_else(|_| format!("testguard-operator.default.svc:{}", args.grpc_port)),
    };

    // Kube-client HTTP metrics and operator metrics share this one registry so both are
    // exposed together on `/metrics`.
    let mut registry = prometheus_client::registry::Registry::with_prefix("testguard");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;
    let operator_metrics = Arc::new(Metrics::new(registry));

    let scheduler = Scheduler::new(operator_metrics.scheduler_pending.clone());
    let _scheduler_thread = scheduler.spawn(tokio::runtime::Handle::current());

    let state = State::new(scheduler, worker_config, operator_metrics);
    let hub = state.hub();

    let controller = suite::run(state.clone(), client);

    let grpc_addr = format!("0.0.0.0:{}", args.grpc_port).parse()?;
    let (_health_reporter, health_svc) = health_service().await;
    let grpc_server = tonic::transport::Server::builder()
        .add_service(health_svc)
        .add_service(ReportIngestionService::new(hub))
        .serve(grpc_addr);

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .service(healthz)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.http_port))?
    .shutdown_timeout(5);

    tokio::try_join!(
        async { controller.await; Ok(()) },
        async { grpc_server.await.map_err(anyhow::Error::from) },
        async { http_server.run().await.map_err(anyhow::Error::from) },
    )?;
    Ok(())
}
