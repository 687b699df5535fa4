//! Prometheus metrics for the stream pipeline.
//!
//! All timing gauges are in nanoseconds.

use std::sync::LazyLock;

use prometheus::{GaugeVec, IntCounter, Opts};

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let gauge = GaugeVec::new(Opts::new(name, help), labels).expect("valid metric opts");
    // Registration can only collide when the process registers twice
    // (tests); the first registration wins either way.
    let _ = prometheus::default_registry().register(Box::new(gauge.clone()));
    gauge
}

/// Time taken to decode a TCP stream, labeled by decoder.
pub static STREAM_DECODE_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    gauge_vec(
        "nc_stream_decode_time",
        "Time taken to process a TCP stream",
        &["Decoder"],
    )
});

/// Time taken to feed data to a TCP stream consumer, labeled by direction.
pub static STREAM_FEED_DATA_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    gauge_vec(
        "nc_stream_feed_data_time",
        "Time taken to feed data to a TCP stream consumer",
        &["Direction"],
    )
});

/// Time taken to save stream data to disk, labeled by direction.
pub static STREAM_PROCESSING_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    gauge_vec(
        "nc_stream_processing_time",
        "Time taken to save the data to disk",
        &["Direction"],
    )
});

/// Total number of connections tracked since start.
pub static NUM_CONNS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("nc_num_conns", "Number of tracked connections")
        .expect("valid metric opts");
    let _ = prometheus::default_registry().register(Box::new(counter.clone()));
    counter
});

/// Direction label values used by the stream gauges.
pub mod direction {
    pub const CLIENT_TO_SERVER: &str = "client->server";
    pub const SERVER_TO_CLIENT: &str = "server->client";
}
