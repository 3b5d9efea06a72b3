use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::flags::flag_models::demo_definitions;
use crate::flags::flag_source::InMemoryFlagSource;
use crate::gate::service::GateService;
use crate::health::HealthRegistry;
use crate::performance::monitor::{PerformanceMonitor, SampleWindow};
use crate::performance::sampler::SimulatedSignal;
use crate::performance::state::PerformanceCell;
use crate::router;
use crate::telemetry::emitter::TelemetryEmitter;
use crate::telemetry::sink::{HttpSink, MetricsSink, RecorderSink};

// Missing three ticks in a row means the monitor loop is stuck
const MONITOR_DEADLINE_TICKS: u32 = 3;
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let thresholds = match config.thresholds() {
        Ok(thresholds) => thresholds,
        Err(e) => {
            tracing::error!("Invalid kill switch thresholds: {}", e);
            return;
        }
    };

    let flag_source = match config.flag_definitions_path() {
        Some(path) => match InMemoryFlagSource::from_json_file(path) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                tracing::error!("Failed to load flag definitions from {}: {}", path, e);
                return;
            }
        },
        None => Arc::new(InMemoryFlagSource::new(demo_definitions())),
    };

    let performance = Arc::new(PerformanceCell::new());
    let gate = Arc::new(GateService::new(
        flag_source.clone(),
        performance.reader(),
    ));
    let change_listener = gate.spawn_change_listener();

    let mut sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(RecorderSink)];
    if let Some(url) = config.metrics_sink_url() {
        match HttpSink::new(
            url,
            Duration::from_millis(config.metrics_sink_timeout_ms),
        ) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => tracing::warn!("HTTP metrics sink disabled: {}", e),
        }
    }
    let (emitter, forwarder) = TelemetryEmitter::spawn(sinks, config.metrics_queue_capacity);

    let health = HealthRegistry::new("liveness");
    let monitor_health = health.register(
        "performance_monitor",
        config.monitor_interval() * MONITOR_DEADLINE_TICKS,
    );

    let window = SampleWindow::new(config.sample_window_size);
    let monitor = PerformanceMonitor::new(
        &config.gated_flag_key,
        thresholds,
        performance.clone(),
        gate.clone(),
        Box::new(SimulatedSignal::new(config.sample_ranges())),
        emitter,
        window.clone(),
    )
    .with_health(monitor_health)
    .spawn(config.monitor_interval());

    let app = router::router(
        gate,
        performance,
        flag_source,
        window,
        thresholds,
        health,
        config,
    );

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on unknown address: {}", e),
    }
    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // Stopping the monitor drops the last emitter, which lets the forwarder drain and exit
    monitor.stop().await;
    change_listener.abort();
    if tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, forwarder)
        .await
        .is_err()
    {
        tracing::warn!("telemetry forwarder did not drain in time");
    }
}
