use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace::SdkTracerProvider,
};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_otel::{
    catch_panic::CatchPanicLayer,
    metrics::{MetricsConfig, MetricsLayer},
    trace::{SpanHandle, TraceConfig, TraceLayer},
    FilterOptions, Settings,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SETTINGS: &str = r#"{
    "service-version": "0.1.0",
    "exclude-paths": ["/health"],
    "record-headers": ["x-request-id", "authorization"],
    "exclude-params": ["token"]
}"#;

async fn handle(request: Request<()>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match request.uri().path() {
        "/hello" => {
            if let Some(span) = request.extensions().get::<SpanHandle>() {
                span.add_event("greeting", vec![KeyValue::new("language", "en")]);
            }
            Response::new(Full::from("hello world"))
        }
        "/health" => Response::new(Full::from("ok")),
        "/panic" => panic!("this route always panics"),
        _ => {
            let mut response = Response::new(Full::from("not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    global::set_text_map_propagator(TraceContextPropagator::new());
    let tracer_provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(opentelemetry_stdout::MetricExporter::default())
        .build();

    let settings: Settings = serde_json::from_str(SETTINGS)?;
    let trace = Arc::new(
        TraceConfig::builder("hello-world")
            .apply(settings.clone())
            .with_tracer_provider(tracer_provider)
            .on_finish(|span, status| info!(?span, status, "request finished"))
            .with_event_handler(|event| eprintln!("instrumentation: {event}"))
            .build()?,
    );
    let metrics = Arc::new(
        MetricsConfig::builder("hello-world")
            .apply(settings)
            .with_meter_provider(meter_provider)
            .build()?,
    );

    let mut service = ServiceBuilder::new()
        .layer(TraceLayer::from_shared(trace.clone()))
        .layer(MetricsLayer::from_shared(metrics.clone()))
        .layer(CatchPanicLayer::new())
        .service_fn(handle);

    for uri in [
        "/hello?name=world&token=secret",
        "/health",
        "/missing",
        "/panic",
    ] {
        let request = Request::get(uri)
            .header("x-request-id", "7f3c")
            .header("authorization", "Bearer never-recorded")
            .body(())?;
        let response = service.ready().await?.call(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        info!(uri, %status, body = %String::from_utf8_lossy(&body), "served");
    }

    trace.shutdown(Duration::from_secs(5)).await?;
    metrics.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}
