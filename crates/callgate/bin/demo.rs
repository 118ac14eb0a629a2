//! End-to-end demonstration of the in-process gate: construction, updates
//! up to the frame limit, throttling, a slide past the window, and
//! persistence to a JSON file.
//!
//! ```bash
//! cargo run -p callgate --bin callgate-demo
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use callgate::{BackendSelector, Decorator, Gate, GateConfig};

fn main() {
    tracing_subscriber::fmt::init();

    let config = GateConfig::new("requests", 4.0, 1.0).with_gate_limit(6).with_frame_limit(3);
    let gate = Arc::new(Gate::open(config, BackendSelector::Local, 4).expect("gate construction"));

    let decorator = Decorator::new(Arc::clone(&gate), 1, true);
    let mut admitted = 0;
    let mut throttled = 0;
    for i in 0..8 {
        match decorator.call(|| i) {
            Ok(_) => admitted += 1,
            Err(e) => {
                throttled += 1;
                tracing::info!(attempt = i, error = %e, "request throttled");
            }
        }
    }
    tracing::info!(admitted, throttled, sum = gate.sum().unwrap(), "first burst complete");

    thread::sleep(Duration::from_secs(4));
    gate.check_limits().expect("window has fully slid, nothing should trip");
    tracing::info!(sum = gate.sum().unwrap(), "window slid clear");

    let path = std::env::temp_dir().join("callgate-demo.json");
    gate.to_file(&path).expect("persist to file");
    tracing::info!(path = %path.display(), "persisted gate state");
}
